//! Link runtime.
//!
//! A [`Link`] runs the [`Scheduler`] on its own thread. The thread sleeps on
//! transport events, wake-ups from [`LinkHandle`] calls and the scheduler's
//! next deadline. Completions are fired after the scheduler lock is released,
//! so callbacks may call back into the handle.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{after, bounded, never, select, unbounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, info};
use zlink_metrics::MetricLabels;
use zlink_protocol::{Command, DeviceStatus};

use crate::config::LinkConfig;
use crate::error::{LinkError, Result};
use crate::events::{
    Completion, CompletionCallback, CompletionStatus, EventFilter, LinkEvent, RequestId,
    Subscribers,
};
use crate::scheduler::{ConnectionState, ItemHandle, Scheduler, SchedulerStats};
use crate::transport::{IoTransport, PortOpener, SerialPortOpener, SessionEvent, Transport};

enum Control {
    Wake,
    Shutdown,
}

/// Cloneable handle to a running link.
pub struct LinkHandle<T: Transport> {
    scheduler: Arc<Mutex<Scheduler<T>>>,
    subscribers: Arc<Subscribers>,
    control: Sender<Control>,
}

impl<T: Transport> Clone for LinkHandle<T> {
    fn clone(&self) -> Self {
        LinkHandle {
            scheduler: Arc::clone(&self.scheduler),
            subscribers: Arc::clone(&self.subscribers),
            control: self.control.clone(),
        }
    }
}

impl<T: Transport> LinkHandle<T> {
    /// Run `f` under the scheduler lock, then fire what it completed.
    fn with_scheduler<R>(&self, f: impl FnOnce(&mut Scheduler<T>) -> R) -> R {
        let (result, completions) = {
            let mut scheduler = self.scheduler.lock();
            let result = f(&mut scheduler);
            (result, scheduler.take_completions())
        };
        fire(completions, &self.subscribers);
        let _ = self.control.send(Control::Wake);
        result
    }

    /// Start a transport session.
    pub fn open(&self) -> Result<()> {
        self.with_scheduler(|s| s.open()).map_err(LinkError::from)
    }

    /// End the transport session. Outstanding work fails with `Disconnected`.
    pub fn close(&self) {
        self.with_scheduler(|s| s.close())
    }

    /// Queue a command. `callback` fires exactly once with the outcome.
    pub fn submit(
        &self,
        command: Command,
        callback: Option<CompletionCallback>,
    ) -> Result<ItemHandle> {
        self.with_scheduler(|s| s.enqueue(command, callback))
            .map_err(LinkError::from)
    }

    /// Queue a bulk request id.
    pub fn submit_request(&self, id: RequestId) -> Result<()> {
        self.with_scheduler(|s| s.submit_request(id))
            .map_err(LinkError::from)
    }

    /// Send `command` and block until its confirm arrives.
    pub fn request(&self, command: Command, timeout: Duration) -> Result<Command> {
        let (tx, rx) = bounded(1);
        let callback: CompletionCallback = Box::new(move |status, response| {
            let _ = tx.send((status, response.cloned()));
        });
        self.submit(command, Some(callback))?;
        match rx.recv_timeout(timeout) {
            Ok((CompletionStatus::Success, Some(response))) => Ok(response),
            Ok((status, _)) => Err(LinkError::Failed(status)),
            Err(_) => Err(LinkError::Timeout("confirm")),
        }
    }

    /// Install the bulk payload resolver.
    pub fn set_resolver<F>(&self, resolver: F)
    where
        F: Fn(RequestId) -> Option<Command> + Send + 'static,
    {
        self.scheduler.lock().set_resolver(resolver);
    }

    /// Receive events matching `filter`.
    pub fn subscribe(&self, filter: EventFilter) -> Receiver<LinkEvent> {
        self.subscribers.subscribe(filter)
    }

    /// Block until the link is operational.
    pub fn wait_connected(&self, timeout: Duration) -> Result<()> {
        let events = self.subscribe(EventFilter::Connection);
        if self.connection_state() == ConnectionState::Operational {
            return Ok(());
        }
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match events.recv_timeout(remaining) {
                Ok(LinkEvent::Connected) => return Ok(()),
                Ok(LinkEvent::Disconnected(reason)) => {
                    debug!("Link: disconnected while waiting ({})", reason);
                }
                Ok(_) => {}
                Err(_) => return Err(LinkError::Timeout("connection")),
            }
        }
    }

    /// Last reported device status.
    pub fn device_status(&self) -> DeviceStatus {
        self.scheduler.lock().device_status()
    }

    /// Connection state.
    pub fn connection_state(&self) -> ConnectionState {
        self.scheduler.lock().connection_state()
    }

    /// Scheduler counters.
    pub fn stats(&self) -> SchedulerStats {
        self.scheduler.lock().stats()
    }
}

/// A scheduler and the thread driving it.
pub struct Link<T: Transport + 'static> {
    handle: LinkHandle<T>,
    worker: Option<JoinHandle<()>>,
    name: String,
}

impl<O: PortOpener> Link<IoTransport<O>> {
    /// Build a link over a threaded transport using `opener`.
    pub fn with_opener(opener: O, config: &LinkConfig) -> Result<Self> {
        config.validate()?;
        let labels = MetricLabels::new(opener.name(), config.name.clone());
        let transport =
            IoTransport::new(opener, config.transport.clone()).with_labels(labels.clone());
        let scheduler = Scheduler::new(transport, config.scheduler.clone()).with_labels(labels);
        Link::spawn(scheduler, &config.name)
    }
}

impl Link<IoTransport<SerialPortOpener>> {
    /// Build a link over the configured serial port.
    pub fn serial(config: &LinkConfig) -> Result<Self> {
        Link::with_opener(SerialPortOpener::from_config(config), config)
    }
}

impl<T: Transport + 'static> Link<T> {
    /// Start the runtime thread for `scheduler`. The transport is not opened.
    pub fn spawn(scheduler: Scheduler<T>, name: &str) -> Result<Self> {
        let events = scheduler.transport().events();
        let (control_tx, control_rx) = unbounded();
        let handle = LinkHandle {
            scheduler: Arc::new(Mutex::new(scheduler)),
            subscribers: Arc::new(Subscribers::new()),
            control: control_tx,
        };

        let runtime = Runtime {
            scheduler: Arc::clone(&handle.scheduler),
            subscribers: Arc::clone(&handle.subscribers),
            events,
            control: control_rx,
            name: name.to_string(),
        };
        let worker = thread::Builder::new()
            .name(format!("zlink-link-{}", name))
            .spawn(move || runtime.run())
            .map_err(LinkError::Spawn)?;

        Ok(Link {
            handle,
            worker: Some(worker),
            name: name.to_string(),
        })
    }

    /// A handle for submitting work.
    pub fn handle(&self) -> LinkHandle<T> {
        self.handle.clone()
    }

    /// Close the transport and stop the runtime thread.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = self.handle.control.send(Control::Shutdown);
            if worker.join().is_err() {
                debug!("Link[{}]: runtime thread panicked", self.name);
            }
        }
    }
}

impl<T: Transport + 'static> std::ops::Deref for Link<T> {
    type Target = LinkHandle<T>;

    fn deref(&self) -> &Self::Target {
        &self.handle
    }
}

impl<T: Transport + 'static> Drop for Link<T> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn fire(completions: Vec<Completion>, subscribers: &Subscribers) {
    for completion in completions {
        completion.fire(subscribers);
    }
}

struct Runtime<T: Transport> {
    scheduler: Arc<Mutex<Scheduler<T>>>,
    subscribers: Arc<Subscribers>,
    events: Receiver<SessionEvent>,
    control: Receiver<Control>,
    name: String,
}

impl<T: Transport> Runtime<T> {
    fn run(self) {
        debug!("Link[{}]: runtime started", self.name);
        let mut deadline: Option<Instant> = None;
        loop {
            let timer = match deadline {
                Some(at) => after(at.saturating_duration_since(Instant::now())),
                None => never(),
            };
            select! {
                recv(self.events) -> event => match event {
                    Ok(event) => self.handle_event(event),
                    Err(_) => break,
                },
                recv(self.control) -> msg => match msg {
                    Ok(Control::Wake) => {}
                    Ok(Control::Shutdown) | Err(_) => break,
                },
                recv(timer) -> _ => {}
            }
            deadline = self.tick();
        }
        self.shutdown();
    }

    fn handle_event(&self, event: SessionEvent) {
        let completions = {
            let mut scheduler = self.scheduler.lock();
            scheduler.handle_transport_event(event, Instant::now());
            scheduler.take_completions()
        };
        fire(completions, &self.subscribers);
    }

    fn tick(&self) -> Option<Instant> {
        let (next, completions) = {
            let mut scheduler = self.scheduler.lock();
            let next = scheduler.service_tick(Instant::now());
            (next, scheduler.take_completions())
        };
        fire(completions, &self.subscribers);
        next
    }

    fn shutdown(&self) {
        let completions = {
            let mut scheduler = self.scheduler.lock();
            scheduler.close();
            scheduler.take_completions()
        };
        fire(completions, &self.subscribers);
        info!("Link[{}]: stopped", self.name);
    }
}
