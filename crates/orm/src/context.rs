//! The explicitly passed context that owns every piece of ORM state.

use crate::cache::{Granularity, ResultCache};
use crate::dialect::Dialect;
use crate::driver::Driver;
use crate::entity::Entity;
use crate::error::Result;
use crate::event::{Event, TOPIC};
use crate::migrate::{Migrator, Policy, Report};
use crate::query::{Builder, Records, Rows};
use crate::registry::{Database, Registry, read, write};
use kiln_bus::Bus;
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// Interval between `clean` events published by the sweeper.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Where an entity type was migrated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub database: String,
    pub table: String,
}

/// Construction options for [`Core`].
#[derive(Debug, Clone, Copy)]
pub struct Options {
    pub granularity: Granularity,
    /// Inbox capacity of each bus subscriber.
    pub bus_capacity: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            granularity: Granularity::default(),
            bus_capacity: kiln_bus::DEFAULT_CAPACITY,
        }
    }
}

#[derive(Debug)]
struct Inner {
    registry: Registry,
    bindings: RwLock<HashMap<TypeId, Binding>>,
    cache: Arc<ResultCache>,
    bus: Bus<Event>,
}

/// Cheaply clonable handle to the registry, entity bindings, result cache
/// and event bus.
///
/// Creating a `Core` subscribes the cache invalidator to the `cache` topic,
/// so it must happen inside a Tokio runtime.
#[derive(Debug, Clone)]
pub struct Core {
    inner: Arc<Inner>,
}

impl Default for Core {
    fn default() -> Self {
        Self::new()
    }
}

impl Core {
    pub fn new() -> Self {
        Self::with_options(Options::default())
    }

    pub fn with_options(options: Options) -> Self {
        let cache = Arc::new(ResultCache::new(options.granularity));
        let bus = Bus::with_capacity(options.bus_capacity);
        let invalidator = Arc::clone(&cache);
        bus.subscribe(TOPIC, move |event: Event| {
            let cache = Arc::clone(&invalidator);
            async move { cache.apply(&event) }
        });
        Self {
            inner: Arc::new(Inner {
                registry: Registry::new(),
                bindings: RwLock::default(),
                cache,
                bus,
            }),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    pub fn cache(&self) -> &ResultCache {
        &self.inner.cache
    }

    pub fn bus(&self) -> &Bus<Event> {
        &self.inner.bus
    }

    /// Open and register a database. The first one becomes the default.
    pub async fn connect(&self, name: &str, dialect: Dialect, url: &str) -> Result<Arc<Database>> {
        self.registry().connect(name, dialect, url).await
    }

    /// Register an already-open driver.
    pub fn register(&self, name: &str, driver: Arc<dyn Driver>) -> Result<Arc<Database>> {
        self.registry().register(name, driver)
    }

    /// A generic-row builder for `table`.
    pub fn table(&self, table: impl Into<String>) -> Builder<'_, Rows> {
        Builder::new(self, Some(table.into()))
    }

    /// A typed builder for `T`, bound to the database and table `T` was
    /// migrated into (or the default database and [`Entity::table_name`]).
    pub fn model<T: Entity>(&self) -> Builder<'_, Records<T>> {
        Builder::new(self, None)
    }

    pub fn binding<T: Entity>(&self) -> Option<Binding> {
        read(&self.inner.bindings).get(&TypeId::of::<T>()).cloned()
    }

    /// Migrate `T` into its default table on `database`.
    pub async fn migrate<T: Entity>(&self, database: &str, policy: Policy) -> Result<Report> {
        self.migrate_into::<T>(database, &T::table_name(), policy).await
    }

    /// Migrate `T` into `table` on `database` and bind `T` to that location.
    #[instrument(skip(self, policy), fields(entity = std::any::type_name::<T>()))]
    pub async fn migrate_into<T: Entity>(&self, database: &str, table: &str, policy: Policy) -> Result<Report> {
        let target = self.registry().lookup(database)?;
        let report = Migrator::new(Arc::clone(&target), policy).migrate(T::fields(), table).await?;
        write(&self.inner.bindings).insert(
            TypeId::of::<T>(),
            Binding { database: target.name().to_string(), table: table.to_string() },
        );
        self.cache().forget_columns(target.name(), table);
        self.cache().forget_tables(target.name());
        Ok(report)
    }

    /// Publish on the cache topic and wait until every subscriber handled
    /// the event. Returns how many did.
    pub async fn publish(&self, event: Event) -> usize {
        self.bus().publish(TOPIC, event).await.delivered().await
    }

    /// Publish `clean` every `every` until the returned sweeper is stopped.
    pub fn spawn_sweeper(&self, every: Duration) -> Sweeper {
        let token = CancellationToken::new();
        let core = self.clone();
        let stop = token.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            // The first tick completes immediately.
            interval.tick().await;
            loop {
                tokio::select! {
                    () = stop.cancelled() => break,
                    _ = interval.tick() => {
                        let delivered = core.publish(Event::clean()).await;
                        tracing::debug!(delivered, "Swept result cache");
                    },
                }
            }
        });
        Sweeper { token, handle }
    }

    /// Close the named databases (all when empty), in registration order.
    pub async fn shutdown(&self, names: &[&str]) -> Result<()> {
        self.registry().shutdown(names).await
    }
}

/// Handle to the background `clean` publisher.
#[derive(Debug)]
pub struct Sweeper {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl Sweeper {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Stop sweeping and wait for the task to finish.
    pub async fn stop(self) {
        self.token.cancel();
        if let Err(err) = self.handle.await {
            tracing::warn!(error = %err, "Sweeper task ended abnormally");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheKey, Partition};
    use crate::driver::MockDriver;
    use crate::event::EventKind;
    use crate::row::Row;

    #[tokio::test]
    async fn test_publish_invalidates_before_returning() {
        let core = Core::new();
        core.cache().put(Partition::RowMany, CacheKey::default(), Arc::new(Vec::<Row>::new()));
        let delivered = core.publish(Event::new(EventKind::Create, "users", "main")).await;
        assert_eq!(delivered, 1);
        assert!(core.cache().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_publishes_clean() {
        let core = Core::new();
        core.cache().put_tables("main", Arc::new(vec!["users".to_string()]));
        let sweeper = core.spawn_sweeper(SWEEP_INTERVAL);
        tokio::time::sleep(SWEEP_INTERVAL + Duration::from_secs(1)).await;
        // Let the invalidator drain its inbox.
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(core.cache().tables("main").is_none());
        sweeper.stop().await;
    }

    crate::entity! {
        #[derive(Debug, Clone, Default)]
        struct Person {
            #[orm("pk;autoinc")]
            id: i64,
            name: String,
        }
    }

    #[tokio::test]
    async fn test_model_follows_binding() {
        let core = Core::new();
        let main = Arc::new(MockDriver::new(Dialect::Sqlite));
        let audit = Arc::new(MockDriver::new(Dialect::Sqlite));
        core.register("main", main.clone()).unwrap();
        core.register("audit", audit.clone()).unwrap();

        core.model::<Person>().all().await.unwrap();
        assert_eq!(main.sql(), vec!["SELECT * FROM persons"]);

        core.migrate_into::<Person>("audit", "people", Policy::Fail).await.unwrap();
        assert_eq!(
            core.binding::<Person>(),
            Some(Binding { database: "audit".to_string(), table: "people".to_string() })
        );
        audit.clear();
        core.model::<Person>().all().await.unwrap();
        assert_eq!(audit.sql(), vec!["SELECT * FROM people"]);
        assert!(core.registry().lookup("audit").unwrap().table("people").is_some());
    }
}
