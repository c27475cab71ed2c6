use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::task;

#[derive(Debug)]
pub struct Task<T> {
    join_handle: task::JoinHandle<T>,
    detached: bool,
}

impl<T> Task<T> {
    pub fn spawn<Fut>(future: Fut) -> Task<T>
    where
        Fut: Future<Output = T> + Send + 'static,
        Fut::Output: Send + 'static,
    {
        Task {
            join_handle: task::spawn(future),
            detached: false,
        }
    }

    /// Let the task run to completion after the handle is dropped.
    pub fn detach(&mut self) {
        self.detached = true;
    }
}

impl<T> Drop for Task<T> {
    fn drop(&mut self) {
        if !self.detached {
            self.join_handle.abort();
        }
    }
}

#[derive(Debug)]
pub struct Timer {
    pub tx: UnboundedSender<TimerMessage>,
}

#[derive(Debug)]
pub enum TimerMessage {
    Refresh,
}

#[derive(PartialEq)]
pub enum TimerType {
    Once,
    Infinite,
}

impl Timer {
    /// Run `cb` once per `duration`. Refresh restarts the interval from now;
    /// dropping the Timer stops it.
    pub fn new<F, Fut>(duration: Duration, typ: TimerType, mut cb: F) -> Timer
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let (tx, mut rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(duration);
            _ = interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        (cb)().await;
                        if typ == TimerType::Once {
                            break;
                        }
                    }
                    message = rx.recv() => {
                        match message {
                            Some(TimerMessage::Refresh) => {
                                interval = tokio::time::interval(duration);
                                _ = interval.tick().await;
                            }
                            None => break,
                        }
                    }
                }
            }
        });
        Timer { tx }
    }

    pub fn second(sec: u64) -> Duration {
        Duration::new(sec, 0)
    }

    pub fn refresh(&self) {
        let _ = self.tx.send(TimerMessage::Refresh);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::unbounded_channel;
    use tokio::time::{sleep, timeout};

    #[tokio::test]
    async fn timer_fires_once() {
        let (tx, mut rx) = unbounded_channel();
        let _timer = Timer::new(Duration::from_millis(20), TimerType::Once, move || {
            let tx = tx.clone();
            async move {
                let _ = tx.send(());
            }
        });
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timer did not fire")
            .expect("timer channel closed");
    }

    #[tokio::test]
    async fn timer_refresh_postpones_expiry() {
        let (tx, mut rx) = unbounded_channel();
        let timer = Timer::new(Duration::from_millis(200), TimerType::Infinite, move || {
            let tx = tx.clone();
            async move {
                let _ = tx.send(());
            }
        });
        sleep(Duration::from_millis(100)).await;
        timer.refresh();
        sleep(Duration::from_millis(150)).await;
        assert!(rx.try_recv().is_err(), "timer fired despite refresh");
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timer did not fire after refresh")
            .expect("timer channel closed");
    }
}
