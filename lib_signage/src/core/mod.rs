//! # Display Core
//!
//! Everything that runs on the single control task:
//!
//! - **`timer`**: cancellable scheduled tasks and single-concern timer slots.
//! - **`events`**: the `ControlEvent` stream and the surface reporter.
//! - **`surface`**: the `RenderSurface` collaborator interface.
//! - **`rotation`**: the page rotation engine with per-page timers and cache-busting.
//! - **`state_machine`**: the Normal/Error display state machine.
//! - **`controller`**: the control task, its handle and the published status.

pub mod controller;
pub mod events;
pub mod rotation;
pub mod state_machine;
pub mod surface;
pub mod timer;

pub use controller::{
    control_channel, ControlHandle, ControlInbox, ControllerSettings, DisplayController,
    DisplayStatus,
};
pub use events::{ControlEvent, MachineEvent, SurfaceReporter};
pub use rotation::{RenderRequest, RotationEngine};
pub use state_machine::{
    DisplayStateMachine, Phase, RetryOutcome, RotationState, DEFAULT_RETRY_DELAY, NO_PAGES_MESSAGE,
};
pub use surface::{RenderError, RenderSurface, SurfaceEvent};
pub use timer::{ScheduledTask, TimerId, TimerSlot};
