/// A discrete `(processed, total)` progress update.
///
/// The archive writer and the restorer emit one per entry; rendering is left
/// to the caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Progress {
    pub processed: u64,
    pub total: u64,
}

impl Progress {
    pub fn new(processed: u64, total: u64) -> Self {
        Self { processed, total }
    }

    /// Whole percentage, rounded down so that 100 means "last entry done".
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        (self.processed.min(self.total) * 100 / self.total) as u8
    }

    pub fn is_complete(&self) -> bool {
        self.processed >= self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_reaches_100_only_at_the_end() {
        let total = 200;
        let percents: Vec<u8> = (1..=total)
            .map(|i| Progress::new(i, total).percent())
            .collect();
        assert!(percents.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(percents.iter().filter(|p| **p == 100).count(), 1);
        assert_eq!(*percents.last().unwrap(), 100);
    }

    #[test]
    fn single_entry_is_complete() {
        let p = Progress::new(1, 1);
        assert_eq!(p.percent(), 100);
        assert!(p.is_complete());
        assert_eq!(Progress::new(0, 0).percent(), 100);
        assert_eq!(Progress::new(1, 3).percent(), 33);
    }
}
