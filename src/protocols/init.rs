use crate::process::{Context, Process, ProcessError, ProcessKind, Step, WaitCondition, Wake};
use std::any::Any;

/// The first process of every device. It never does anything, but keeps
/// usermode pid 1 occupied for as long as the device is on.
#[derive(Debug, Default, Clone, Copy)]
pub struct InitProcess;

impl Process for InitProcess {
    fn kind(&self) -> ProcessKind {
        ProcessKind::Init
    }

    fn advance(&mut self, _wake: Wake, _cx: &mut Context<'_>) -> Result<Step, ProcessError> {
        Ok(Step::Wait(WaitCondition::never()))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
