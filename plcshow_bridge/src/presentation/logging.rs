//! Presenter that tracks state and logs every operation.
//!
//! Default backend; useful for commissioning the PLC side before a real
//! engine is wired up.

use super::{PresentationError, Presenter};
use crate::mapping::Locator;
use tracing::info;

/// Logging presenter.
#[derive(Debug, Default)]
pub struct LogPresenter {
    /// Currently open resource
    opened: Option<Locator>,
    /// Playback running
    active: bool,
    /// Slide position of the running presentation, starting at 1
    position: u32,
}

impl LogPresenter {
    /// Nothing open.
    pub fn new() -> Self {
        Self::default()
    }

    /// Currently open resource.
    pub fn opened(&self) -> Option<&Locator> {
        self.opened.as_ref()
    }

    /// Slide position, 0 before activation.
    pub fn position(&self) -> u32 {
        self.position
    }
}

impl Presenter for LogPresenter {
    fn open(&mut self, locator: &Locator) -> Result<(), PresentationError> {
        if let Some(previous) = self.opened.take() {
            info!("Closing {}", previous);
        }
        info!("Opening {}", locator);
        self.opened = Some(locator.clone());
        self.active = false;
        self.position = 0;
        Ok(())
    }

    fn activate(&mut self) -> Result<(), PresentationError> {
        let Some(locator) = &self.opened else {
            return Err(PresentationError::NotActive);
        };
        if self.active {
            info!("Resuming {} at slide {}", locator, self.position);
        } else {
            self.active = true;
            self.position = 1;
            info!("Starting {}", locator);
        }
        Ok(())
    }

    fn advance(&mut self) -> Result<(), PresentationError> {
        if !self.active {
            return Err(PresentationError::NotActive);
        }
        self.position += 1;
        info!("Advanced to slide {}", self.position);
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_activate_advance() {
        let mut p = LogPresenter::new();
        assert_eq!(p.advance(), Err(PresentationError::NotActive));
        assert_eq!(p.activate(), Err(PresentationError::NotActive));

        p.open(&Locator::new("a.pptx")).unwrap();
        assert!(!p.is_active());
        p.activate().unwrap();
        p.activate().unwrap();
        assert_eq!(p.position(), 1);
        p.advance().unwrap();
        assert_eq!(p.position(), 2);

        p.open(&Locator::new("b.pptx")).unwrap();
        assert!(!p.is_active());
        assert_eq!(p.opened(), Some(&Locator::new("b.pptx")));
    }
}
