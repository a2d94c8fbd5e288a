//! Presentation collaborator interface.
//!
//! The bridge never renders anything itself. It drives whatever engine sits
//! behind [`Presenter`] from the control context only: presenters are not
//! required to be `Send` and are constructed on the thread that uses them.

pub mod command;
pub mod logging;

use crate::mapping::Locator;
use plcshow_common::config::{PresentationConfig, PresenterBackend};
use thiserror::Error;

pub use self::command::CommandPresenter;
pub use self::logging::LogPresenter;

/// Presenter failures. Reported as status events, never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PresentationError {
    /// The resource could not be opened.
    #[error("Cannot open {locator}: {reason}")]
    OpenFailed {
        /// Resource that failed
        locator: String,
        /// Engine's description
        reason: String,
    },

    /// No resource is open or the engine is not running it.
    #[error("No active presentation")]
    NotActive,

    /// The engine rejected the operation.
    #[error("Presentation engine error: {0}")]
    Engine(String),
}

/// Operations the presentation engine must provide.
pub trait Presenter {
    /// Open `locator`, closing whatever was open before.
    fn open(&mut self, locator: &Locator) -> Result<(), PresentationError>;

    /// Begin or resume playback. Idempotent.
    fn activate(&mut self) -> Result<(), PresentationError>;

    /// Step the running presentation forward.
    fn advance(&mut self) -> Result<(), PresentationError>;

    /// Whether a presentation is currently playing.
    fn is_active(&self) -> bool;
}

/// Build the presenter selected in `[presentation]`.
pub fn from_config(config: &PresentationConfig) -> Box<dyn Presenter> {
    match config.backend {
        PresenterBackend::Log => Box::new(LogPresenter::new()),
        PresenterBackend::Command => Box::new(CommandPresenter::from_config(config)),
    }
}

impl<P: Presenter + ?Sized> Presenter for Box<P> {
    fn open(&mut self, locator: &Locator) -> Result<(), PresentationError> {
        (**self).open(locator)
    }

    fn activate(&mut self) -> Result<(), PresentationError> {
        (**self).activate()
    }

    fn advance(&mut self) -> Result<(), PresentationError> {
        (**self).advance()
    }

    fn is_active(&self) -> bool {
        (**self).is_active()
    }
}
