/// Progress events emitted by the ranker and the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum Progress {
    /// A pipeline stage begins. `index` is 1-based.
    StageStart {
        name: &'static str,
        index: usize,
        total: usize,
    },
    StageFinish {
        name: &'static str,
        skipped: bool,
    },

    PhaseStart { name: &'static str },
    PhaseFinish,

    TaskStart { total_steps: u64 },
    TaskIncrement,
    TaskFinish,

    Message(String),
}

pub type ProgressCallback<'a> = Box<dyn Fn(Progress) + Send + Sync + 'a>;

/// Forwards [`Progress`] events to an optional callback; silent without one.
#[derive(Default)]
pub struct ProgressReporter<'a> {
    callback: Option<ProgressCallback<'a>>,
}

impl<'a> ProgressReporter<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_callback(callback: ProgressCallback<'a>) -> Self {
        Self {
            callback: Some(callback),
        }
    }

    #[inline]
    pub fn report(&self, event: Progress) {
        if let Some(cb) = &self.callback {
            cb(event);
        }
    }

    /// Runs `f` between a `PhaseStart` and a `PhaseFinish` event.
    pub fn phase<T>(&self, name: &'static str, f: impl FnOnce() -> T) -> T {
        self.report(Progress::PhaseStart { name });
        let out = f();
        self.report(Progress::PhaseFinish);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn reporter_without_callback_is_silent() {
        ProgressReporter::new().report(Progress::TaskIncrement);
    }

    #[test]
    fn phase_brackets_the_closure() {
        let events = Mutex::new(Vec::new());
        let reporter = ProgressReporter::with_callback(Box::new(|e| {
            events.lock().unwrap().push(e);
        }));
        let value = reporter.phase("Loading", || {
            reporter.report(Progress::TaskIncrement);
            7
        });
        drop(reporter);

        assert_eq!(value, 7);
        assert_eq!(
            events.into_inner().unwrap(),
            vec![
                Progress::PhaseStart { name: "Loading" },
                Progress::TaskIncrement,
                Progress::PhaseFinish,
            ]
        );
    }
}
