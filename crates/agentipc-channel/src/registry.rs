use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tracing::{debug, error, info};

use crate::affinity::{ConnectionId, ThreadAffinity};
use crate::channel::{Channel, ChannelConfig};
use crate::consumer::Consumer;
use crate::dispatch::{DispatchHandle, Dispatcher};
use crate::error::{ChannelError, Result};
use crate::handler::Handler;

/// Routine that starts a provider's dispatch loop.
///
/// Called by [`ProviderRegistry::start_all`] with the provider's name.
/// [`ProviderRegistry::start`] is the usual choice.
pub type StartRoutine = fn(&ProviderRegistry, &str) -> Result<DispatchHandle>;

struct ProviderEntry {
    channel: Channel,
    start: Option<StartRoutine>,
}

/// Snapshot of one provider, for status reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderInfo {
    pub name: String,
    pub listeners: usize,
    pub capacity: usize,
    pub has_handler: bool,
    pub has_start: bool,
    pub started: bool,
}

/// The set of providers in one process, with their channels.
///
/// Lifecycle, in order:
/// 1. [`add_provider`](Self::add_provider), then bind each provider's
///    [`set_handler`](Self::set_handler) and [`set_start`](Self::set_start).
/// 2. [`register`](Self::register) consumer connections.
/// 3. [`sanity_check`](Self::sanity_check) and [`start`](Self::start) or
///    [`start_all`](Self::start_all).
///
/// Registering against a started provider is rejected, as is starting one
/// twice.
pub struct ProviderRegistry {
    providers: Mutex<Vec<ProviderEntry>>,
    affinity: Arc<ThreadAffinity>,
    next_connection: AtomicU64,
}

impl ProviderRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            providers: Mutex::new(Vec::new()),
            affinity: Arc::new(ThreadAffinity::new()),
            next_connection: AtomicU64::new(1),
        }
    }

    /// Add a provider with an empty channel.
    pub fn add_provider(&self, name: &str, config: ChannelConfig) -> Result<()> {
        if name.is_empty() || name.contains(|c: char| c.is_whitespace() || c == '\0') {
            return Err(ChannelError::InvalidName(name.to_string()));
        }

        let mut providers = self.lock();
        if providers.iter().any(|entry| entry.channel.name() == name) {
            return Err(ChannelError::DuplicateProvider(name.to_string()));
        }
        debug!(provider = name, capacity = config.capacity, "added provider");
        providers.push(ProviderEntry {
            channel: Channel::new(name, config),
            start: None,
        });
        Ok(())
    }

    /// Bind the provider's request handler.
    pub fn set_handler(&self, name: &str, handler: impl Handler) -> Result<()> {
        self.with_provider(name, |entry| entry.channel.set_handler(handler))
    }

    /// Set the routine that starts the provider's dispatch loop.
    pub fn set_start(&self, name: &str, routine: StartRoutine) -> Result<()> {
        self.with_provider(name, |entry| {
            entry.start = Some(routine);
            Ok(())
        })
    }

    /// Register a consumer connection on the named provider's channel.
    ///
    /// Fails with [`ChannelError::CapacityExceeded`] once the channel holds
    /// `capacity` connections, and with [`ChannelError::RegistrationClosed`]
    /// once its dispatch loop has started.
    pub fn register(&self, name: &str) -> Result<Consumer> {
        let (stream, id, config) = self.with_provider(name, |entry| {
            let id = ConnectionId::new(self.next_connection.fetch_add(1, Ordering::Relaxed));
            let stream = entry.channel.open_connection(id)?;
            Ok((stream, id, entry.channel.config().clone()))
        })?;

        Consumer::new(
            name.to_string(),
            id,
            stream,
            Arc::clone(&self.affinity),
            &config,
        )
    }

    /// Start the named provider's dispatch loop on its own thread.
    ///
    /// The channel's listener set is frozen from here on.
    pub fn start(&self, name: &str) -> Result<DispatchHandle> {
        let handle = self.with_provider(name, |entry| {
            let dispatcher = Dispatcher::for_channel(&mut entry.channel)?;
            DispatchHandle::spawn(dispatcher).inspect_err(|err| {
                error!(
                    provider = name,
                    error = %err,
                    "dispatch thread failed to spawn; channel listeners are gone"
                );
            })
        })?;
        info!(provider = name, "started dispatch loop");
        Ok(handle)
    }

    /// Verify that every provider with a handler also has a start routine.
    ///
    /// Providers whose dispatch loop is already running pass.
    ///
    /// Without one, consumers of that provider would time out on every
    /// request. Run this before [`start_all`](Self::start_all).
    pub fn sanity_check(&self) -> Result<()> {
        let providers = self.lock();
        for entry in providers.iter() {
            let running = entry.channel.is_started();
            if entry.channel.has_handler() && entry.start.is_none() && !running {
                let provider = entry.channel.name().to_string();
                error!(provider = %provider, "provider has a handler but no start routine");
                return Err(ChannelError::MissingStart { provider });
            }
        }
        Ok(())
    }

    /// Run [`sanity_check`](Self::sanity_check), then every start routine in
    /// the order providers were added.
    ///
    /// If a routine fails, loops already started are stopped before the
    /// error is returned.
    pub fn start_all(&self) -> Result<Vec<DispatchHandle>> {
        self.sanity_check()?;

        let routines: Vec<(String, StartRoutine)> = self
            .lock()
            .iter()
            .filter(|entry| !entry.channel.is_started())
            .filter_map(|entry| entry.start.map(|start| (entry.channel.name().to_string(), start)))
            .collect();

        let mut handles = Vec::with_capacity(routines.len());
        for (name, start) in routines {
            match start(self, &name) {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    error!(provider = %name, error = %err, "start routine failed");
                    for handle in handles {
                        handle.stop();
                    }
                    return Err(err);
                }
            }
        }
        Ok(handles)
    }

    /// Snapshot of every provider, in the order they were added.
    pub fn providers(&self) -> Vec<ProviderInfo> {
        self.lock()
            .iter()
            .map(|entry| ProviderInfo {
                name: entry.channel.name().to_string(),
                listeners: entry.channel.listener_count(),
                capacity: entry.channel.capacity(),
                has_handler: entry.channel.has_handler(),
                has_start: entry.start.is_some(),
                started: entry.channel.is_started(),
            })
            .collect()
    }

    /// The thread-affinity map shared by every consumer of this registry.
    pub fn affinity(&self) -> &Arc<ThreadAffinity> {
        &self.affinity
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ProviderEntry>> {
        self.providers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_provider<R>(
        &self,
        name: &str,
        f: impl FnOnce(&mut ProviderEntry) -> Result<R>,
    ) -> Result<R> {
        let mut providers = self.lock();
        let entry = providers
            .iter_mut()
            .find(|entry| entry.channel.name() == name)
            .ok_or_else(|| ChannelError::UnknownProvider(name.to_string()))?;
        f(entry)
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.providers())
            .finish()
    }
}
