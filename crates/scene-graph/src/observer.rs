use std::panic::{catch_unwind, AssertUnwindSafe};

use anyhow::Result;
use tracing::{debug, warn};

use crate::event::SceneEvent;
use crate::scene::{lock_write, SharedScene};

/// Sink notified about mutations of a scene.
///
/// `accepted` is false only for rejected mutations, which are delivered when
/// the scene is configured to report them.
pub trait SceneObserver: Send + Sync {
    fn on_update(&mut self, event: &SceneEvent, accepted: bool) -> Result<()>;

    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

impl<F> SceneObserver for F
where
    F: FnMut(&SceneEvent, bool) -> Result<()> + Send + Sync,
{
    fn on_update(&mut self, event: &SceneEvent, accepted: bool) -> Result<()> {
        self(event, accepted)
    }
}

/// Token returned by [`ObserverBus::attach`], used to detach again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverHandle(u64);

/// Ordered observer list with best-effort, synchronous fan-out.
#[derive(Default)]
pub struct ObserverBus {
    observers: Vec<(ObserverHandle, Box<dyn SceneObserver>)>,
    next_handle: u64,
}

impl ObserverBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&mut self, observer: Box<dyn SceneObserver>) -> ObserverHandle {
        let handle = ObserverHandle(self.next_handle);
        self.next_handle += 1;
        debug!(observer = observer.name(), "observer attached");
        self.observers.push((handle, observer));
        handle
    }

    pub fn detach(&mut self, handle: ObserverHandle) -> Option<Box<dyn SceneObserver>> {
        let index = self.observers.iter().position(|(h, _)| *h == handle)?;
        Some(self.observers.remove(index).1)
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    /// Calls every observer in attach order. Failures and panics are logged
    /// and counted; they never stop the remaining observers.
    pub fn notify(&mut self, event: &SceneEvent, accepted: bool) -> usize {
        let mut failures = 0;
        for (_, observer) in self.observers.iter_mut() {
            let outcome = catch_unwind(AssertUnwindSafe(|| observer.on_update(event, accepted)));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    failures += 1;
                    warn!(observer = observer.name(), op = event.operation().as_str(), error = %e, "observer failed");
                }
                Err(_) => {
                    failures += 1;
                    warn!(observer = observer.name(), op = event.operation().as_str(), "observer panicked");
                }
            }
        }
        failures
    }
}

/// Applies every accepted event to another scene, keeping an in-process replica.
pub struct SceneGraphListener {
    target: SharedScene,
}

impl SceneGraphListener {
    pub fn new(target: SharedScene) -> Self {
        Self { target }
    }
}

impl SceneObserver for SceneGraphListener {
    fn on_update(&mut self, event: &SceneEvent, accepted: bool) -> Result<()> {
        if !accepted {
            return Ok(());
        }
        let mut scene = lock_write(&self.target)?;
        scene.apply(event.clone())?;
        Ok(())
    }

    fn name(&self) -> &str {
        "scene-listener"
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::id::Id;

    fn delete(id: u128) -> SceneEvent {
        SceneEvent::Delete {
            id: Id::from_u128(id),
        }
    }

    #[test]
    fn failing_observers_do_not_stop_fan_out() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut bus = ObserverBus::new();
        bus.attach(Box::new(|_: &SceneEvent, _: bool| -> Result<()> {
            anyhow::bail!("transport down")
        }));
        bus.attach(Box::new(|_: &SceneEvent, _: bool| -> Result<()> { panic!("boom") }));
        let sink = Arc::clone(&seen);
        bus.attach(Box::new(move |event: &SceneEvent, accepted: bool| -> Result<()> {
            sink.lock().unwrap().push((event.node_id(), accepted));
            Ok(())
        }));

        assert_eq!(bus.notify(&delete(5), true), 2);
        assert_eq!(*seen.lock().unwrap(), vec![(Id::from_u128(5), true)]);
    }

    #[test]
    fn detach_removes_only_that_observer() {
        let count = Arc::new(Mutex::new(0));
        let mut bus = ObserverBus::new();
        let first = Arc::clone(&count);
        let handle = bus.attach(Box::new(move |_: &SceneEvent, _: bool| -> Result<()> {
            *first.lock().unwrap() += 1;
            Ok(())
        }));
        let second = Arc::clone(&count);
        bus.attach(Box::new(move |_: &SceneEvent, _: bool| -> Result<()> {
            *second.lock().unwrap() += 10;
            Ok(())
        }));

        bus.notify(&delete(1), true);
        assert!(bus.detach(handle).is_some());
        assert!(bus.detach(handle).is_none());
        bus.notify(&delete(1), true);
        assert_eq!(*count.lock().unwrap(), 21);
        assert_eq!(bus.len(), 1);
    }
}
