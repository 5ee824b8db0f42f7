use super::errors::{JobError, WorkExecutionError};
use std::{
    any::Any,
    borrow::Cow,
    fmt,
    panic::{self, AssertUnwindSafe},
};

/// A unit of deferred, fire-and-forget work.
///
/// Everything the job needs is captured when it is built; the pool only
/// calls [`Job::execute`] once, on some worker thread, and logs the outcome.
pub trait Job: Send + 'static {
    /// Consumes the job and runs it.
    fn execute(self: Box<Self>) -> Result<(), JobError>;

    /// Name used in logs when the job fails.
    fn label(&self) -> Cow<'static, str> {
        Cow::Borrowed(std::any::type_name::<Self>())
    }
}

impl<F, E> Job for F
where
    F: FnOnce() -> Result<(), E> + Send + 'static,
    E: Into<JobError>,
{
    fn execute(self: Box<Self>) -> Result<(), JobError> {
        (*self)().map_err(Into::into)
    }
}

/// A job as it sits in the queue: the job itself plus the id and label the
/// pool assigned at submission.
pub struct WorkItem {
    id: u64,
    label: Cow<'static, str>,
    job: Box<dyn Job>,
}

impl WorkItem {
    pub fn new(id: u64, label: Cow<'static, str>, job: Box<dyn Job>) -> Self {
        Self { id, label, job }
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Runs the job, turning both returned errors and panics into a
    /// [`WorkExecutionError`].
    pub fn run(self) -> Result<(), WorkExecutionError> {
        let job = self.job;
        match panic::catch_unwind(AssertUnwindSafe(move || job.execute())) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(WorkExecutionError::Failed(err)),
            Err(payload) => Err(WorkExecutionError::Panicked(panic_message(payload.as_ref()))),
        }
    }
}

impl fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkItem")
            .field("id", &self.id)
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_owned()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
