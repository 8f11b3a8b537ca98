//! Train/validation partitioning.
//!
//! With a date axis the last `validation_days` days are held out
//! (forward-chaining, so no future rows reach training). Without one, a
//! seeded random split is used. The policy follows from the presence of
//! dates alone.

use chrono::{Duration, NaiveDate};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::config::TrainingConfig;

/// How a split was made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitPolicy {
    /// Rows dated on or before `cutoff` train; later rows validate
    TimeBased { cutoff: NaiveDate },
    /// Seeded shuffle, first share trains
    Random { seed: u64 },
}

impl SplitPolicy {
    pub fn describe(&self) -> String {
        match self {
            SplitPolicy::TimeBased { cutoff } => format!("time-based (cutoff {})", cutoff),
            SplitPolicy::Random { seed } => format!("random (seed {})", seed),
        }
    }
}

/// Row indices of each side of a split.
#[derive(Debug, Clone)]
pub struct SplitIndices {
    pub train: Vec<usize>,
    pub validation: Vec<usize>,
    pub policy: SplitPolicy,
}

#[derive(Debug, Clone)]
pub struct DatasetSplitter {
    validation_days: i64,
    validation_fraction: f64,
    seed: u64,
}

impl DatasetSplitter {
    pub fn new(config: &TrainingConfig) -> Self {
        Self {
            validation_days: config.validation_days,
            validation_fraction: config.random_validation_fraction,
            seed: config.seed,
        }
    }

    /// Split `n_rows` rows, by date when `dates` is given.
    ///
    /// Rows with a null date carry no position in time and stay on the
    /// training side. A date column with no dates at all falls back to
    /// the random split.
    pub fn split(&self, n_rows: usize, dates: Option<&[Option<NaiveDate>]>) -> SplitIndices {
        if let Some(dates) = dates {
            if let Some(max_date) = dates.iter().flatten().max() {
                return self.split_by_time(dates, *max_date);
            }
        }
        self.split_random(n_rows)
    }

    fn split_by_time(&self, dates: &[Option<NaiveDate>], max_date: NaiveDate) -> SplitIndices {
        let cutoff = max_date - Duration::days(self.validation_days);
        let mut train = Vec::new();
        let mut validation = Vec::new();
        for (i, date) in dates.iter().enumerate() {
            match date {
                Some(d) if *d > cutoff => validation.push(i),
                _ => train.push(i),
            }
        }
        SplitIndices {
            train,
            validation,
            policy: SplitPolicy::TimeBased { cutoff },
        }
    }

    fn split_random(&self, n_rows: usize) -> SplitIndices {
        let mut indices: Vec<usize> = (0..n_rows).collect();
        let mut rng = StdRng::seed_from_u64(self.seed);
        indices.shuffle(&mut rng);

        let n_train = ((n_rows as f64) * (1.0 - self.validation_fraction)).round() as usize;
        let validation = indices.split_off(n_train.min(n_rows));
        SplitIndices {
            train: indices,
            validation,
            policy: SplitPolicy::Random { seed: self.seed },
        }
    }
}
