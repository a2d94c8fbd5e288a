//! Presenter that drives an external viewer through command lines.
//!
//! `open` spawns the viewer and keeps it as a child process; the child is
//! killed when another resource is opened or the presenter is dropped.
//! `activate` and `advance` run short-lived helper commands (for example a
//! key injector) and wait for their exit status. `{locator}` in any argument
//! is replaced with the path of the open resource.

use super::{PresentationError, Presenter};
use crate::mapping::Locator;
use plcshow_common::config::PresentationConfig;
use std::cell::RefCell;
use std::process::{Child, Command, Stdio};
use tracing::{debug, info, warn};

const PLACEHOLDER: &str = "{locator}";

/// External-command presenter.
#[derive(Debug, Default)]
pub struct CommandPresenter {
    /// Viewer command line
    open_cmd: Vec<String>,
    /// Start/resume helper
    activate_cmd: Vec<String>,
    /// Advance helper
    advance_cmd: Vec<String>,
    /// Running viewer
    viewer: RefCell<Option<Child>>,
    /// Resource shown by the viewer
    opened: Option<Locator>,
}

fn substitute(argv: &[String], locator: Option<&Locator>) -> Vec<String> {
    let replacement = locator.map(|l| l.to_string()).unwrap_or_default();
    argv.iter()
        .map(|arg| arg.replace(PLACEHOLDER, &replacement))
        .collect()
}

fn build(argv: &[String]) -> Option<Command> {
    let (program, args) = argv.split_first()?;
    let mut cmd = Command::new(program);
    cmd.args(args).stdin(Stdio::null());
    Some(cmd)
}

impl CommandPresenter {
    /// Presenter using the command lines from `[presentation]`.
    pub fn from_config(config: &PresentationConfig) -> Self {
        Self::new(
            config.open.clone(),
            config.activate.clone(),
            config.advance.clone(),
        )
    }

    /// Presenter with explicit command lines.
    pub fn new(open_cmd: Vec<String>, activate_cmd: Vec<String>, advance_cmd: Vec<String>) -> Self {
        Self {
            open_cmd,
            activate_cmd,
            advance_cmd,
            viewer: RefCell::new(None),
            opened: None,
        }
    }

    fn close_viewer(&mut self) {
        if let Some(mut child) = self.viewer.get_mut().take() {
            debug!("Stopping viewer pid {}", child.id());
            let _ = child.kill();
            let _ = child.wait();
        }
    }

    fn run_helper(&self, argv: &[String]) -> Result<(), PresentationError> {
        let argv = substitute(argv, self.opened.as_ref());
        let Some(mut cmd) = build(&argv) else {
            return Ok(());
        };
        let status = cmd
            .status()
            .map_err(|e| PresentationError::Engine(format!("{}: {e}", argv[0])))?;
        if status.success() {
            Ok(())
        } else {
            Err(PresentationError::Engine(format!("{} exited with {status}", argv[0])))
        }
    }
}

impl Presenter for CommandPresenter {
    fn open(&mut self, locator: &Locator) -> Result<(), PresentationError> {
        self.close_viewer();
        self.opened = None;

        let argv = substitute(&self.open_cmd, Some(locator));
        let mut cmd = build(&argv).ok_or_else(|| PresentationError::OpenFailed {
            locator: locator.to_string(),
            reason: "no open command configured".to_string(),
        })?;
        let child = cmd.spawn().map_err(|e| PresentationError::OpenFailed {
            locator: locator.to_string(),
            reason: e.to_string(),
        })?;

        info!("Viewer pid {} showing {}", child.id(), locator);
        *self.viewer.get_mut() = Some(child);
        self.opened = Some(locator.clone());
        Ok(())
    }

    fn activate(&mut self) -> Result<(), PresentationError> {
        if !self.is_active() {
            return Err(PresentationError::NotActive);
        }
        self.run_helper(&self.activate_cmd)
    }

    fn advance(&mut self) -> Result<(), PresentationError> {
        if !self.is_active() {
            return Err(PresentationError::NotActive);
        }
        if self.advance_cmd.is_empty() {
            return Err(PresentationError::Engine(
                "no advance command configured".to_string(),
            ));
        }
        self.run_helper(&self.advance_cmd)
    }

    fn is_active(&self) -> bool {
        let mut viewer = self.viewer.borrow_mut();
        match viewer.as_mut().map(Child::try_wait) {
            Some(Ok(None)) => true,
            Some(Ok(Some(status))) => {
                debug!("Viewer exited with {}", status);
                false
            }
            Some(Err(e)) => {
                warn!("Cannot query viewer state: {}", e);
                false
            }
            None => false,
        }
    }
}

impl Drop for CommandPresenter {
    fn drop(&mut self) {
        self.close_viewer();
    }
}
