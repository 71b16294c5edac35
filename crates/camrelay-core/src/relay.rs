//! Multi-producer / single-consumer queue of pending [`Command`]s.

use crate::command::Command;
use crossbeam_channel::{Receiver, Sender};
use thiserror::Error;

#[derive(Error, Debug)]
#[error("command relay closed")]
pub struct RelayClosed;

/// Producer side of the relay. Cheap to clone; never blocks.
#[derive(Clone, Debug)]
pub struct CommandSender {
    tx: Sender<Command>,
}

impl CommandSender {
    pub fn send(&self, command: Command) -> Result<(), RelayClosed> {
        if command.is_empty() {
            return Ok(());
        }
        self.tx.send(command).map_err(|_| RelayClosed)
    }
}

/// Unbounded ordered queue between the UI / remote server and the active
/// acquisition worker.
#[derive(Debug)]
pub struct CommandRelay {
    tx: Sender<Command>,
    rx: Receiver<Command>,
}

impl Default for CommandRelay {
    fn default() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self { tx, rx }
    }
}

impl CommandRelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sender(&self) -> CommandSender {
        CommandSender {
            tx: self.tx.clone(),
        }
    }

    /// Take every command queued right now, without blocking, merged
    /// last-writer-wins per key. `None` when nothing was queued.
    pub fn drain(&self) -> Option<Command> {
        let mut merged: Option<Command> = None;
        for cmd in self.rx.try_iter() {
            match merged.as_mut() {
                Some(m) => m.merge(cmd),
                None => merged = Some(cmd),
            }
        }
        merged
    }

    /// Number of commands waiting for the next drain.
    pub fn pending(&self) -> usize {
        self.rx.len()
    }
}
