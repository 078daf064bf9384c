use mio::{unix::SourceFd, Events, Interest, Poll, Token};
use std::{collections::HashMap, io::ErrorKind, os::fd::RawFd, time::Duration};

const EVENT_CAPACITY: usize = 64;

type Callback<C> = Box<dyn FnMut(&mut C) -> crate::Result<ResultType> + Send>;
type Guard<C> = Box<dyn Fn(&C) -> bool + Send>;

/// Readiness direction a callback is interested in.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Direction {
  /// The socket has data to read.
  In,
  /// The socket accepts more data.
  Out,
}

/// Disposition returned by a callback.
#[derive(Debug)]
pub enum ResultType {
  /// Keep the callback registered.
  Continue,
  /// Terminate the poll loop with the provided exit status.
  Exit(i32),
  /// Unregister every callback of the originating socket, in both directions.
  CancelAll,
}

/// Outcome of a single poll cycle.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PollResult {
  /// At least one callback ran.
  Success,
  /// The timeout elapsed before any socket became ready.
  Timeout,
  /// A callback requested termination, or no callbacks remain.
  Exit(i32),
}

/// A socket descriptor paired with a direction, a guard and a callback.
///
/// Guards are re-evaluated every cycle: only descriptors whose guard currently returns `true`
/// are armed. Callbacks receive the caller-provided context by exclusive reference and look up
/// whatever state they need through it.
pub struct Action<C> {
  callback: Callback<C>,
  direction: Direction,
  fd: RawFd,
  guard: Guard<C>,
  token: Token,
}

impl<C> Action<C> {
  /// Creates a new instance. Actions sharing a token must refer to the same descriptor.
  #[inline]
  pub fn new(
    fd: RawFd,
    token: Token,
    direction: Direction,
    guard: Guard<C>,
    callback: Callback<C>,
  ) -> Self {
    Self { callback, direction, fd, guard, token }
  }
}

/// Context threaded through every callback invocation.
pub trait PollContext: Sized {
  /// Actions registered from within a callback; adopted by the poller after the callback
  /// returns.
  fn pending_actions(&mut self) -> &mut Vec<Action<Self>>;
}

struct Slot<C> {
  callback: Callback<C>,
  guard: Guard<C>,
}

struct Entry<C> {
  armed: Option<Interest>,
  fd: RawFd,
  read: Option<Slot<C>>,
  write: Option<Slot<C>>,
}

/// Multiplexes an arbitrary number of sockets within a single thread.
pub struct Poller<C> {
  entries: HashMap<Token, Entry<C>>,
  events: Events,
  poll: Poll,
}

impl<C> Poller<C>
where
  C: PollContext,
{
  /// Creates a new instance without any registered action.
  #[inline]
  pub fn new() -> crate::Result<Self> {
    Ok(Self {
      entries: HashMap::new(),
      events: Events::with_capacity(EVENT_CAPACITY),
      poll: Poll::new()?,
    })
  }

  /// Registers `action`, replacing a previous action of the same token and direction.
  #[inline]
  pub fn add_action(&mut self, action: Action<C>) {
    let Action { callback, direction, fd, guard, token } = action;
    let entry =
      self.entries.entry(token).or_insert(Entry { armed: None, fd, read: None, write: None });
    if entry.fd != fd {
      // the token was re-used with a fresh descriptor
      if entry.armed.is_some() {
        let _rslt = self.poll.registry().deregister(&mut SourceFd(&entry.fd));
      }
      entry.armed = None;
      entry.fd = fd;
      entry.read = None;
      entry.write = None;
    }
    let slot = Some(Slot { callback, guard });
    match direction {
      Direction::In => entry.read = slot,
      Direction::Out => entry.write = slot,
    }
  }

  /// Unregisters both directions of `token`.
  #[inline]
  pub fn cancel(&mut self, token: Token) {
    if let Some(entry) = self.entries.remove(&token) {
      if entry.armed.is_some() {
        // the descriptor may already be closed, in which case the kernel removed it
        let _rslt = self.poll.registry().deregister(&mut SourceFd(&entry.fd));
      }
    }
  }

  /// Arms every action whose guard holds, waits for readiness and runs the matching callbacks.
  ///
  /// `None` blocks indefinitely. Without any registered action the loop has nothing left to
  /// drive, so `Exit(0)` is returned.
  #[inline]
  pub fn poll(&mut self, ctx: &mut C, timeout: Option<Duration>) -> crate::Result<PollResult> {
    if self.entries.is_empty() {
      return Ok(PollResult::Exit(0));
    }
    self.arm(ctx)?;
    loop {
      match self.poll.poll(&mut self.events, timeout) {
        Ok(()) => break,
        Err(err) if err.kind() == ErrorKind::Interrupted => {}
        Err(err) => return Err(err.into()),
      }
    }
    if self.events.is_empty() {
      return Ok(if timeout.is_some() { PollResult::Timeout } else { PollResult::Success });
    }
    let fired: Vec<(Token, bool, bool)> = self
      .events
      .iter()
      .map(|el| {
        (
          el.token(),
          el.is_readable() || el.is_read_closed() || el.is_error(),
          el.is_writable() || el.is_write_closed(),
        )
      })
      .collect();
    for (token, is_readable, is_writable) in fired {
      if is_readable {
        if let Some(status) = self.fire(ctx, token, Direction::In)? {
          return Ok(PollResult::Exit(status));
        }
      }
      if is_writable {
        if let Some(status) = self.fire(ctx, token, Direction::Out)? {
          return Ok(PollResult::Exit(status));
        }
      }
    }
    Ok(PollResult::Success)
  }

  fn arm(&mut self, ctx: &C) -> crate::Result<()> {
    let registry = self.poll.registry();
    for (&token, entry) in &mut self.entries {
      let mut desired = None;
      if entry.read.as_ref().map_or(false, |slot| (slot.guard)(ctx)) {
        desired = Some(Interest::READABLE);
      }
      if entry.write.as_ref().map_or(false, |slot| (slot.guard)(ctx)) {
        desired = Some(desired.map_or(Interest::WRITABLE, |el| el | Interest::WRITABLE));
      }
      // registered descriptors are re-armed even when the interest did not change, which
      // keeps delivery level-triggered across cycles
      match (entry.armed, desired) {
        (None, None) => {}
        (None, Some(interest)) => registry.register(&mut SourceFd(&entry.fd), token, interest)?,
        (Some(_), Some(interest)) => {
          registry.reregister(&mut SourceFd(&entry.fd), token, interest)?;
        }
        (Some(_), None) => {
          let _rslt = registry.deregister(&mut SourceFd(&entry.fd));
        }
      }
      entry.armed = desired;
    }
    Ok(())
  }

  fn fire(&mut self, ctx: &mut C, token: Token, direction: Direction) -> crate::Result<Option<i32>> {
    let rslt = {
      let Some(entry) = self.entries.get_mut(&token) else {
        // cancelled earlier in this same cycle
        return Ok(None);
      };
      let slot_opt = match direction {
        Direction::In => entry.read.as_mut(),
        Direction::Out => entry.write.as_mut(),
      };
      let Some(slot) = slot_opt else {
        return Ok(None);
      };
      if !(slot.guard)(ctx) {
        return Ok(None);
      }
      (slot.callback)(ctx)?
    };
    for action in core::mem::take(ctx.pending_actions()) {
      self.add_action(action);
    }
    match rslt {
      ResultType::Continue => Ok(None),
      ResultType::Exit(status) => Ok(Some(status)),
      ResultType::CancelAll => {
        self.cancel(token);
        Ok(None)
      }
    }
  }
}
