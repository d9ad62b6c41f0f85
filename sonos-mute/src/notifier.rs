//! Callback fan-out with durable and one-shot subscriptions

use std::sync::Arc;

use parking_lot::Mutex;

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Queues<T> {
    durable: Vec<Callback<T>>,
    one_shot: Vec<Callback<T>>,
}

/// Fan-out of change notifications to subscribed callbacks
///
/// Durable callbacks run on every publish. One-shot callbacks run on the
/// next publish only. Callbacks always run outside the internal lock, so a
/// callback may subscribe again (it will first be invoked on the following
/// publish) or publish without deadlocking.
pub struct ChangeNotifier<T> {
    queues: Mutex<Queues<T>>,
}

impl<T> ChangeNotifier<T> {
    pub fn new() -> Self {
        Self {
            queues: Mutex::new(Queues {
                durable: Vec::new(),
                one_shot: Vec::new(),
            }),
        }
    }

    /// Invoke `callback` on every future publish
    pub fn subscribe<F>(&self, callback: F)
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.queues.lock().durable.push(Arc::new(callback));
    }

    /// Invoke `callback` on the next publish only
    pub fn subscribe_once<F>(&self, callback: F)
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.queues.lock().one_shot.push(Arc::new(callback));
    }

    /// Notify subscribers of `value`, returning how many callbacks ran
    pub fn publish(&self, value: &T) -> usize {
        let (durable, one_shot) = {
            let mut queues = self.queues.lock();
            (queues.durable.clone(), std::mem::take(&mut queues.one_shot))
        };

        for callback in durable.iter().chain(one_shot.iter()) {
            callback(value);
        }
        durable.len() + one_shot.len()
    }

    /// Number of durable and pending one-shot subscriptions
    pub fn subscriber_count(&self) -> usize {
        let queues = self.queues.lock();
        queues.durable.len() + queues.one_shot.len()
    }
}

impl<T> Default for ChangeNotifier<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for ChangeNotifier<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let queues = self.queues.lock();
        f.debug_struct("ChangeNotifier")
            .field("durable", &queues.durable.len())
            .field("one_shot", &queues.one_shot.len())
            .finish()
    }
}
