//! Channel runtime.
//!
//! Channels wrap a `crossbeam-channel` bounded pair (capacity 0 gives the
//! rendezvous behavior the source language requires). Close is modelled by
//! dropping the channel's sender handle: receivers drain the buffer and
//! then observe disconnection, which maps to the element zero with
//! `ok=false`. Sends initiated after a close panic.
//!
//! All blocking operations are deadline-bounded so a task parked on a
//! channel still observes context cancellation.

use std::{sync::Arc, time::Duration};

use crossbeam_channel::{
    Receiver, RecvTimeoutError, Select, SendTimeoutError, Sender, TrySelectError, bounded,
};
use parking_lot::Mutex;

use crate::{
    error::{Panic, RunResult},
    types::TypeId,
    value::Value,
};

/// A channel value. Clones alias the same channel.
#[derive(Debug, Clone)]
pub(crate) struct ChanValue(Arc<ChanInner>);

#[derive(Debug)]
struct ChanInner {
    /// `None` once the channel has been closed.
    sender: Mutex<Option<Sender<Value>>>,
    receiver: Receiver<Value>,
    cap: usize,
    elem: TypeId,
}

/// Result of a deadline-bounded send.
pub(crate) enum SendOutcome {
    Sent,
    TimedOut,
}

/// Result of a deadline-bounded receive.
pub(crate) enum RecvOutcome {
    Value(Value),
    /// Channel closed and drained; the caller substitutes the element zero.
    Closed,
    TimedOut,
}

impl ChanValue {
    pub fn new(cap: usize, elem: TypeId) -> Self {
        let (sender, receiver) = bounded(cap);
        Self(Arc::new(ChanInner {
            sender: Mutex::new(Some(sender)),
            receiver,
            cap,
            elem,
        }))
    }

    pub fn elem(&self) -> TypeId {
        self.0.elem
    }

    pub fn len(&self) -> usize {
        self.0.receiver.len()
    }

    pub fn capacity(&self) -> usize {
        self.0.cap
    }

    pub fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }

    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }

    fn sender_clone(&self) -> Option<Sender<Value>> {
        self.0.sender.lock().clone()
    }

    /// Blocking send, bounded by `timeout`. Panics on a closed channel.
    pub fn send(&self, value: Value, timeout: Duration) -> RunResult<SendOutcome> {
        let Some(sender) = self.sender_clone() else {
            return Err(Panic::msg("send on closed channel"));
        };
        match sender.send_timeout(value, timeout) {
            Ok(()) => Ok(SendOutcome::Sent),
            Err(SendTimeoutError::Timeout(_)) => Ok(SendOutcome::TimedOut),
            Err(SendTimeoutError::Disconnected(_)) => Err(Panic::msg("send on closed channel")),
        }
    }

    /// Blocking receive, bounded by `timeout`.
    pub fn recv(&self, timeout: Duration) -> RecvOutcome {
        match self.0.receiver.recv_timeout(timeout) {
            Ok(value) => RecvOutcome::Value(value),
            Err(RecvTimeoutError::Disconnected) => RecvOutcome::Closed,
            Err(RecvTimeoutError::Timeout) => RecvOutcome::TimedOut,
        }
    }

    /// Closes the channel. Buffered values remain receivable; subsequent
    /// receives observe disconnection.
    pub fn close(&self) -> RunResult<()> {
        let taken = self.0.sender.lock().take();
        match taken {
            Some(_) => Ok(()),
            None => Err(Panic::msg("close of closed channel")),
        }
    }
}

/// One case of a `select` instruction, with channels already resolved.
pub(crate) enum SelectOp {
    Send { chan: ChanValue, value: Value },
    Recv { chan: ChanValue },
}

/// What a `select` produced.
pub(crate) enum SelectResult {
    Chosen {
        index: usize,
        recv_ok: bool,
        /// Received value for a chosen receive case; `None` when the case
        /// was a send, or the channel was closed.
        value: Option<Value>,
    },
    /// Non-blocking select with no ready case.
    Default,
    /// Blocking select that outlived the deadline.
    TimedOut,
}

/// Runs a select over the given cases.
///
/// Blocking selects wait up to `timeout`; non-blocking ones try once and
/// fall through to `Default`. A chosen send on a closed channel panics.
pub(crate) fn run_select(ops: Vec<SelectOp>, blocking: bool, timeout: Duration) -> RunResult<SelectResult> {
    if ops.is_empty() {
        if blocking {
            // `select {}` blocks forever; the deadline is the only way out.
            std::thread::sleep(timeout);
            return Ok(SelectResult::TimedOut);
        }
        return Ok(SelectResult::Default);
    }

    // Endpoints must outlive the Select that borrows them. A closed
    // channel's send case registers a disconnected stand-in sender so the
    // select reports it ready and the completion panics, matching send
    // semantics on closed channels.
    let mut send_values: Vec<Option<Value>> = Vec::with_capacity(ops.len());
    let mut senders: Vec<Option<Sender<Value>>> = Vec::with_capacity(ops.len());
    let mut receivers: Vec<Option<Receiver<Value>>> = Vec::with_capacity(ops.len());
    for op in &ops {
        match op {
            SelectOp::Send { chan, value } => {
                let sender = chan.sender_clone().unwrap_or_else(disconnected_sender);
                senders.push(Some(sender));
                receivers.push(None);
                send_values.push(Some(value.clone()));
            }
            SelectOp::Recv { chan, .. } => {
                senders.push(None);
                receivers.push(Some(chan.0.receiver.clone()));
                send_values.push(None);
            }
        }
    }

    let mut sel = Select::new();
    for (i, op) in ops.iter().enumerate() {
        match op {
            SelectOp::Send { .. } => {
                sel.send(senders[i].as_ref().expect("send case has a sender"));
            }
            SelectOp::Recv { .. } => {
                sel.recv(receivers[i].as_ref().expect("recv case has a receiver"));
            }
        }
    }

    let oper = if blocking {
        match sel.select_timeout(timeout) {
            Ok(oper) => oper,
            Err(_) => return Ok(SelectResult::TimedOut),
        }
    } else {
        match sel.try_select() {
            Ok(oper) => oper,
            Err(TrySelectError) => return Ok(SelectResult::Default),
        }
    };

    let index = oper.index();
    match &ops[index] {
        SelectOp::Send { .. } => {
            let sender = senders[index].as_ref().expect("send case has a sender");
            let value = send_values[index].take().expect("send case has a value");
            match oper.send(sender, value) {
                Ok(()) => Ok(SelectResult::Chosen {
                    index,
                    recv_ok: false,
                    value: None,
                }),
                Err(_) => Err(Panic::msg("send on closed channel")),
            }
        }
        SelectOp::Recv { .. } => {
            let receiver = receivers[index].as_ref().expect("recv case has a receiver");
            match oper.recv(receiver) {
                Ok(value) => Ok(SelectResult::Chosen {
                    index,
                    recv_ok: true,
                    value: Some(value),
                }),
                Err(_) => Ok(SelectResult::Chosen {
                    index,
                    recv_ok: false,
                    value: None,
                }),
            }
        }
    }
}

fn disconnected_sender() -> Sender<Value> {
    let (sender, receiver) = bounded(1);
    drop(receiver);
    sender
}

#[cfg(test)]
mod tests {
    use super::*;

    const TICK: Duration = Duration::from_millis(50);

    #[test]
    fn buffered_send_recv() {
        let c = ChanValue::new(1, TypeId::INT);
        assert!(matches!(c.send(Value::Int(5), TICK).unwrap(), SendOutcome::Sent));
        assert!(matches!(c.recv(TICK), RecvOutcome::Value(Value::Int(5))));
    }

    #[test]
    fn recv_after_close_drains_then_reports_closed() {
        let c = ChanValue::new(2, TypeId::INT);
        c.send(Value::Int(1), TICK).unwrap();
        c.close().unwrap();
        assert!(matches!(c.recv(TICK), RecvOutcome::Value(Value::Int(1))));
        assert!(matches!(c.recv(TICK), RecvOutcome::Closed));
    }

    #[test]
    fn send_after_close_panics() {
        let c = ChanValue::new(1, TypeId::INT);
        c.close().unwrap();
        assert!(c.send(Value::Int(1), TICK).is_err());
        assert!(c.close().is_err());
    }

    #[test]
    fn unbuffered_send_times_out_without_receiver() {
        let c = ChanValue::new(0, TypeId::INT);
        assert!(matches!(
            c.send(Value::Int(1), Duration::from_millis(5)).unwrap(),
            SendOutcome::TimedOut
        ));
    }

    #[test]
    fn select_prefers_ready_case() {
        let a = ChanValue::new(1, TypeId::INT);
        let b = ChanValue::new(1, TypeId::INT);
        b.send(Value::Int(9), TICK).unwrap();
        let result = run_select(
            vec![
                SelectOp::Recv { chan: a },
                SelectOp::Recv { chan: b },
            ],
            true,
            TICK,
        )
        .unwrap();
        match result {
            SelectResult::Chosen { index, recv_ok, value } => {
                assert_eq!(index, 1);
                assert!(recv_ok);
                assert!(matches!(value, Some(Value::Int(9))));
            }
            _ => panic!("expected a chosen case"),
        }
    }

    #[test]
    fn nonblocking_select_defaults_when_nothing_ready() {
        let a = ChanValue::new(0, TypeId::INT);
        let result = run_select(
            vec![SelectOp::Recv { chan: a }],
            false,
            TICK,
        )
        .unwrap();
        assert!(matches!(result, SelectResult::Default));
    }
}
