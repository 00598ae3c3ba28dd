//! Operator command hand-off queue.
//!
//! [`command_queue`] returns a producer/consumer pair over an unbounded
//! [`tokio::sync::mpsc`] channel:
//!
//! * [`CommandQueue`] is cheap to clone and is handed to every request
//!   handler. [`CommandQueue::enqueue`] never blocks and never fails.
//! * [`CommandDrain`] is the single consumer; owning it is what makes the
//!   queue single-consumer. It supports both polling
//!   ([`CommandDrain::try_dequeue`]) and awaiting ([`CommandDrain::recv`]).
//!
//! Ordering is FIFO across producers: if one `enqueue` returns before
//! another begins, the first command is dequeued first. The queue lives in
//! memory only; commands still pending when the process exits are lost.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use hydronom_types::CommandRecord;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Create a connected producer/consumer pair.
pub fn command_queue() -> (CommandQueue, CommandDrain) {
    let (tx, rx) = mpsc::unbounded_channel();
    let pending = Arc::new(AtomicUsize::new(0));
    (
        CommandQueue {
            tx,
            pending: Arc::clone(&pending),
        },
        CommandDrain { rx, pending },
    )
}

/// Producer handle. Clone it freely.
#[derive(Clone, Debug)]
pub struct CommandQueue {
    tx: mpsc::UnboundedSender<CommandRecord>,
    pending: Arc<AtomicUsize>,
}

impl CommandQueue {
    /// Append `command` to the tail of the queue.
    pub fn enqueue(&self, command: CommandRecord) {
        self.pending.fetch_add(1, Ordering::SeqCst);
        match self.tx.send(command) {
            Ok(()) => debug!(pending = self.len(), "command enqueued"),
            Err(mpsc::error::SendError(lost)) => {
                self.pending.fetch_sub(1, Ordering::SeqCst);
                warn!(
                    vehicle_id = %lost.vehicle_id,
                    command = %lost.command,
                    "command drain is gone; command dropped"
                );
            }
        }
    }

    /// Commands enqueued but not yet dequeued.
    pub fn len(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The single consumer end of the queue.
#[derive(Debug)]
pub struct CommandDrain {
    rx: mpsc::UnboundedReceiver<CommandRecord>,
    pending: Arc<AtomicUsize>,
}

impl CommandDrain {
    /// Remove and return the head command, or `None` if the queue is empty.
    pub fn try_dequeue(&mut self) -> Option<CommandRecord> {
        let command = self.rx.try_recv().ok()?;
        self.pending.fetch_sub(1, Ordering::SeqCst);
        Some(command)
    }

    /// Wait for the next command.
    ///
    /// Returns `None` once every [`CommandQueue`] handle has been dropped and
    /// the queue is empty.
    pub async fn recv(&mut self) -> Option<CommandRecord> {
        let command = self.rx.recv().await?;
        self.pending.fetch_sub(1, Ordering::SeqCst);
        Some(command)
    }
}
