//! The accelerator task collaborator trait.

/// An opaque unit of accelerator work.
///
/// The pipeline worker only calls [`run`](Task::run) and propagates its
/// status; `0` means success, anything else is a task-defined failure code.
pub trait Task: Send {
    /// Human-readable name for diagnostics.
    fn name(&self) -> &str {
        "task"
    }

    /// Execute one processing unit. Returns `0` on success.
    fn run(&mut self) -> i32;

    /// Post-processing run on the producer thread after a successful
    /// pipelined [`run`](Task::run). Returns `0` on success.
    fn finalize_pipelined(&mut self) -> i32 {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Countdown(u32);

    impl Task for Countdown {
        fn run(&mut self) -> i32 {
            self.0 = self.0.saturating_sub(1);
            if self.0 == 0 {
                1
            } else {
                0
            }
        }
    }

    #[test]
    fn default_hooks() {
        let mut t = Countdown(2);
        assert_eq!(t.name(), "task");
        assert_eq!(t.run(), 0);
        assert_eq!(t.finalize_pipelined(), 0);
        assert_eq!(t.run(), 1);
    }

    #[test]
    fn task_is_object_safe() {
        let mut boxed: Box<dyn Task> = Box::new(Countdown(5));
        assert_eq!(boxed.run(), 0);
    }
}
