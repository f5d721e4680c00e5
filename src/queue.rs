//! Single-worker serial task queue.
//!
//! All blocking transport work (open, write, close) is funnelled through one
//! [`SerialQueue`] so that operations on the link never interleave. Tasks run
//! one at a time, in submission order, on a dedicated Tokio task.
//!
//! Shutdown stops accepting new tasks and drains what is already queued; a
//! task that has started always runs to completion.

use std::{
   future::Future,
   panic::AssertUnwindSafe,
   pin::Pin,
   task::{Context, Poll},
};

use futures::{FutureExt, future::BoxFuture};
use log::{debug, error};
use parking_lot::Mutex;
use tokio::{
   sync::{
      mpsc::{self, error::TrySendError},
      oneshot,
   },
   task::JoinHandle,
};

use crate::error::{Result, SerialError};

type Job = BoxFuture<'static, ()>;

/// Handle to the output of a submitted task.
///
/// Resolves to `Err(TaskAborted)` if the task was dropped without producing
/// a value, which only happens when it panics.
#[derive(Debug)]
pub struct Ticket<T> {
   rx: oneshot::Receiver<T>,
}

impl<T> Ticket<T> {
   /// A ticket that is already resolved, without going through a queue.
   pub fn ready(value: T) -> Self {
      let (tx, rx) = oneshot::channel();
      let _ = tx.send(value);
      Self { rx }
   }
}

impl<T> Future for Ticket<T> {
   type Output = Result<T>;

   fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
      Pin::new(&mut self.rx)
         .poll(cx)
         .map(|res| res.map_err(|_| SerialError::TaskAborted))
   }
}

pub struct SerialQueue {
   name: &'static str,
   tx: Mutex<Option<mpsc::Sender<Job>>>,
   worker: Mutex<Option<JoinHandle<()>>>,
}

impl SerialQueue {
   /// Creates the queue and spawns its worker.
   ///
   /// Must be called from within a Tokio runtime.
   pub fn new(name: &'static str, capacity: usize) -> Self {
      let (tx, rx) = mpsc::channel(capacity.max(1));
      let worker = tokio::spawn(run_worker(name, rx));
      Self {
         name,
         tx: Mutex::new(Some(tx)),
         worker: Mutex::new(Some(worker)),
      }
   }

   /// Enqueues `task` and returns immediately.
   ///
   /// Fails with `ManagerShutdown` once [`shutdown`](Self::shutdown) has been
   /// called and with `QueueFull` when the backlog is at capacity.
   pub fn submit<F>(&self, task: F) -> Result<Ticket<F::Output>>
   where
      F: Future + Send + 'static,
      F::Output: Send + 'static,
   {
      let (then, rx) = oneshot::channel();
      let job: Job = Box::pin(async move {
         let _ = then.send(task.await);
      });

      let guard = self.tx.lock();
      let tx = guard.as_ref().ok_or(SerialError::ManagerShutdown)?;
      tx.try_send(job).map_err(|e| match e {
         TrySendError::Full(_) => SerialError::QueueFull,
         TrySendError::Closed(_) => SerialError::ManagerShutdown,
      })?;
      Ok(Ticket { rx })
   }

   pub fn is_closed(&self) -> bool {
      self.tx.lock().is_none()
   }

   /// Stops accepting tasks and waits for the worker to drain the backlog.
   pub async fn shutdown(&self) {
      drop(self.tx.lock().take());

      let worker = self.worker.lock().take();
      if let Some(worker) = worker
         && let Err(e) = worker.await
      {
         error!("{} queue worker failed: {e}", self.name);
      }
   }
}

async fn run_worker(name: &'static str, mut rx: mpsc::Receiver<Job>) {
   debug!("{name} queue started");
   while let Some(job) = rx.recv().await {
      if AssertUnwindSafe(job).catch_unwind().await.is_err() {
         error!("Task on {name} queue panicked");
      }
   }
   debug!("{name} queue drained");
}

#[cfg(test)]
mod tests {
   use std::{
      sync::{
         Arc,
         atomic::{AtomicUsize, Ordering},
      },
      time::Duration,
   };

   use tokio::time;

   use super::*;

   #[tokio::test]
   async fn test_tasks_run_in_submission_order() {
      let queue = SerialQueue::new("test", 16);
      let seen = Arc::new(Mutex::new(Vec::new()));

      let mut tickets = Vec::new();
      for i in 0..8u64 {
         let seen = seen.clone();
         // Earlier tasks sleep longer; order must still hold.
         tickets.push(
            queue
               .submit(async move {
                  time::sleep(Duration::from_millis(8 - i)).await;
                  seen.lock().push(i);
               })
               .unwrap(),
         );
      }
      for ticket in tickets {
         ticket.await.unwrap();
      }

      assert_eq!(*seen.lock(), (0..8).collect::<Vec<_>>());
   }

   #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
   async fn test_tasks_never_overlap() {
      let queue = SerialQueue::new("test", 64);
      let running = Arc::new(AtomicUsize::new(0));
      let peak = Arc::new(AtomicUsize::new(0));

      let mut tickets = Vec::new();
      for _ in 0..32 {
         let running = running.clone();
         let peak = peak.clone();
         tickets.push(
            queue
               .submit(async move {
                  let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                  peak.fetch_max(now, Ordering::SeqCst);
                  time::sleep(Duration::from_millis(1)).await;
                  running.fetch_sub(1, Ordering::SeqCst);
               })
               .unwrap(),
         );
      }
      for ticket in tickets {
         ticket.await.unwrap();
      }

      assert_eq!(peak.load(Ordering::SeqCst), 1);
   }

   #[tokio::test]
   async fn test_submit_does_not_wait_for_task() {
      let queue = SerialQueue::new("test", 4);
      let (gate_tx, gate_rx) = oneshot::channel::<()>();

      let ticket = queue
         .submit(async move {
            let _ = gate_rx.await;
            7
         })
         .unwrap();
      let mut ticket = Box::pin(ticket);
      assert!(ticket.as_mut().now_or_never().is_none());

      gate_tx.send(()).unwrap();
      assert_eq!(ticket.await.unwrap(), 7);
   }

   #[tokio::test]
   async fn test_panicking_task_is_contained() {
      let queue = SerialQueue::new("test", 4);

      async fn explode() -> u32 {
         panic!("boom")
      }

      let bad = queue.submit(explode()).unwrap();
      let good = queue.submit(async { "still running" }).unwrap();

      assert!(matches!(bad.await, Err(SerialError::TaskAborted)));
      assert_eq!(good.await.unwrap(), "still running");
   }

   #[tokio::test]
   async fn test_full_queue_rejects() {
      let queue = SerialQueue::new("test", 1);

      // The worker has not been scheduled yet, so the first job occupies the
      // only slot.
      let first = queue.submit(async {}).unwrap();
      assert!(matches!(
         queue.submit(async {}),
         Err(SerialError::QueueFull)
      ));
      first.await.unwrap();
   }

   #[tokio::test]
   async fn test_shutdown_drains_and_rejects() {
      let queue = SerialQueue::new("test", 8);
      let done = Arc::new(AtomicUsize::new(0));

      let mut tickets = Vec::new();
      for _ in 0..3 {
         let done = done.clone();
         tickets.push(
            queue
               .submit(async move {
                  time::sleep(Duration::from_millis(5)).await;
                  done.fetch_add(1, Ordering::SeqCst);
               })
               .unwrap(),
         );
      }

      queue.shutdown().await;
      assert!(queue.is_closed());
      assert_eq!(done.load(Ordering::SeqCst), 3);
      for ticket in tickets {
         ticket.await.unwrap();
      }

      assert!(matches!(
         queue.submit(async {}),
         Err(SerialError::ManagerShutdown)
      ));
      // Second shutdown is a no-op.
      queue.shutdown().await;
   }

   #[tokio::test]
   async fn test_ready_ticket() {
      assert_eq!(Ticket::ready(3).await.unwrap(), 3);
   }
}
