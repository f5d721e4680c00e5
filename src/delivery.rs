//! Result delivery for manager operations.
//!
//! Every operation hands back a [`Completion`] immediately. It resolves
//! exactly once, either with the operation's value or with a
//! [`SerialError`], and can be awaited or turned into a pair of callbacks.

use std::{
   future::Future,
   pin::Pin,
   task::{Context, Poll},
};

use tokio::task::JoinHandle;

use crate::{
   error::{Result, SerialError},
   queue::Ticket,
};

enum State<T> {
   Ready(Option<Result<T>>),
   Queued(Ticket<Result<T>>),
}

/// Pending outcome of a connection manager operation.
#[must_use = "a completion does nothing unless awaited or given callbacks"]
pub struct Completion<T> {
   state: State<T>,
}

// The value is only ever moved out, never pinned in place.
impl<T> Unpin for Completion<T> {}

impl<T> Completion<T> {
   pub(crate) fn ready(result: Result<T>) -> Self {
      Self {
         state: State::Ready(Some(result)),
      }
   }

   pub(crate) fn failed(err: SerialError) -> Self {
      Self::ready(Err(err))
   }

   pub(crate) fn queued(ticket: Ticket<Result<T>>) -> Self {
      Self {
         state: State::Queued(ticket),
      }
   }

   /// Whether the outcome was decided without queueing any work.
   pub const fn is_immediate(&self) -> bool {
      matches!(self.state, State::Ready(_))
   }
}

impl<T: Send + 'static> Completion<T> {
   /// Delivers the outcome to exactly one of the two callbacks.
   ///
   /// The callbacks run on a Tokio task; the returned handle resolves once
   /// the chosen callback has returned.
   pub fn on_complete<S, E>(self, on_success: S, on_error: E) -> JoinHandle<()>
   where
      S: FnOnce(T) + Send + 'static,
      E: FnOnce(SerialError) + Send + 'static,
   {
      tokio::spawn(async move {
         match self.await {
            Ok(value) => on_success(value),
            Err(e) => on_error(e),
         }
      })
   }
}

impl<T> Future for Completion<T> {
   type Output = Result<T>;

   fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
      match &mut self.get_mut().state {
         State::Ready(result) => Poll::Ready(result.take().unwrap_or(Err(SerialError::TaskAborted))),
         State::Queued(ticket) => Pin::new(ticket).poll(cx).map(|res| res.and_then(|r| r)),
      }
   }
}

#[cfg(test)]
mod tests {
   use std::sync::{
      Arc,
      atomic::{AtomicUsize, Ordering},
   };

   use super::*;
   use crate::{peer::PeerId, queue::SerialQueue};

   #[derive(Default)]
   struct Calls {
      success: AtomicUsize,
      error: AtomicUsize,
   }

   impl Calls {
      fn deliver<T: Send + 'static>(self: &Arc<Self>, completion: Completion<T>) -> JoinHandle<()> {
         let ok = self.clone();
         let err = self.clone();
         completion.on_complete(
            move |_| {
               ok.success.fetch_add(1, Ordering::SeqCst);
            },
            move |_| {
               err.error.fetch_add(1, Ordering::SeqCst);
            },
         )
      }

      fn counts(&self) -> (usize, usize) {
         (
            self.success.load(Ordering::SeqCst),
            self.error.load(Ordering::SeqCst),
         )
      }
   }

   #[tokio::test]
   async fn test_ready_completion() {
      let done = Completion::ready(Ok(5));
      assert!(done.is_immediate());
      assert_eq!(done.await.unwrap(), 5);

      let failed = Completion::<()>::failed(SerialError::NotConnected(PeerId::from("AA:BB")));
      assert!(matches!(failed.await, Err(SerialError::NotConnected(_))));
   }

   #[tokio::test]
   async fn test_queued_completion_flattens() {
      let queue = SerialQueue::new("test", 4);

      let ok = Completion::queued(queue.submit(async { Ok::<_, SerialError>(1) }).unwrap());
      assert!(!ok.is_immediate());
      assert_eq!(ok.await.unwrap(), 1);

      let err = Completion::<u8>::queued(
         queue
            .submit(async { Err(SerialError::PeerNotFound(PeerId::from("AA:BB"))) })
            .unwrap(),
      );
      assert!(matches!(err.await, Err(SerialError::PeerNotFound(_))));
   }

   #[tokio::test]
   async fn test_callbacks_fire_exactly_once() {
      let calls = Arc::new(Calls::default());

      calls.deliver(Completion::ready(Ok(()))).await.unwrap();
      assert_eq!(calls.counts(), (1, 0));

      calls
         .deliver(Completion::<()>::failed(SerialError::ManagerShutdown))
         .await
         .unwrap();
      assert_eq!(calls.counts(), (1, 1));
   }
}
