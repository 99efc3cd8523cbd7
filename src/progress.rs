//! Progress reporting for long-running read/write/erase operations.

/// Sink for progress events during a bulk card operation (SPEC_FULL.md §4.8,
/// §4.9). Synchronous: this tool has no background worker thread, so calls
/// happen inline with the operation they report on.
pub trait ProgressSink {
    /// Called once before the first unit of work, with the total unit count.
    fn on_start(&mut self, total: u64);
    /// Called after completing one unit of work.
    fn on_step(&mut self);
    /// Called once after the last unit of work completes.
    fn on_finish(&mut self);
}

/// A `ProgressSink` that does nothing, for callers that don't want output
/// (library use, tests).
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn on_start(&mut self, _total: u64) {}
    fn on_step(&mut self) {}
    fn on_finish(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_progress_accepts_all_calls() {
        let mut sink = NullProgress;
        sink.on_start(10);
        sink.on_step();
        sink.on_finish();
    }
}
