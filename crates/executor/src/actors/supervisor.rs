use std::{collections::HashMap, time::Duration};
use tracing::{debug, error, info, warn};

use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::{self, Instant},
};
use uuid::Uuid;

use common::actors::{Actor, ActorType, ControlMessage};

pub type ActorFactory = Box<dyn Fn() -> Box<dyn Actor> + Send + Sync>;

const UNRESPONSIVE_AFTER: Duration = Duration::from_secs(3);

/// One live incarnation of a registered actor.
struct Instance {
    id: Uuid,
    handle: JoinHandle<()>,
    /// Relays the instance's control messages; aborting it cuts off a
    /// stale heartbeat task along with the instance.
    relay: JoinHandle<()>,
    last_pulse: Instant,
}

impl Instance {
    fn retire(self) {
        self.handle.abort();
        self.relay.abort();
    }
}

/// Keeps one instance of every registered actor alive.
///
/// Instances that stop sending heartbeats for three seconds, or whose task
/// ends without asking to shut down, are replaced by a fresh one from the
/// actor's factory.
pub struct Supervisor {
    actor_factories: HashMap<ActorType, ActorFactory>,
    instances: HashMap<ActorType, Instance>,
    restarts: HashMap<ActorType, u32>,
}

impl Supervisor {
    pub fn new() -> Self {
        Self {
            actor_factories: HashMap::new(),
            instances: HashMap::new(),
            restarts: HashMap::new(),
        }
    }

    pub fn register_actor(&mut self, actor_type: ActorType, factory: ActorFactory) {
        self.actor_factories.insert(actor_type, factory);
    }

    pub fn restarts(&self, actor_type: ActorType) -> u32 {
        self.restarts.get(&actor_type).copied().unwrap_or(0)
    }

    /// Runs until `shutdown` flips to `true` (or its sender goes away), then
    /// stops every instance.
    pub async fn start(&mut self, mut shutdown: watch::Receiver<bool>) {
        let mut check_interval = time::interval(Duration::from_secs(1));
        let (supervisor_tx, mut supervisor_rx) = mpsc::channel::<ControlMessage>(512);

        let actors: Vec<ActorType> = self.actor_factories.keys().copied().collect();
        for actor in actors {
            self.spawn_actor(actor, &supervisor_tx);
        }

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }

                Some(msg) = supervisor_rx.recv() => {
                    match msg {
                        ControlMessage::Heartbeat(id) => {
                            match self.instances.values_mut().find(|i| i.id == id) {
                                Some(instance) => instance.last_pulse = Instant::now(),
                                None => debug!("Heartbeat from retired actor {}", id),
                            }
                        }
                        ControlMessage::Shutdown(id) => {
                            if let Some(actor_type) = self.owner(id) {
                                warn!("{:?} is shutting down gracefully.", actor_type);
                                if let Some(instance) = self.instances.remove(&actor_type) {
                                    instance.retire();
                                }
                            }
                        }
                        ControlMessage::Error(id, error_msg) => {
                            let actor_type = self.owner(id);
                            error!("Actor {:?} reported error: {}", actor_type, error_msg);
                            if let Some(instance) = actor_type.and_then(|t| self.instances.get_mut(&t)) {
                                instance.last_pulse = Instant::now();
                            }
                        }
                    }
                }

                _ = check_interval.tick() => {
                    let deadline = Instant::now() - UNRESPONSIVE_AFTER;

                    let failed: Vec<ActorType> = self
                        .instances
                        .iter()
                        .filter_map(|(actor_type, instance)| {
                            if instance.handle.is_finished() {
                                warn!("{:?} stopped unexpectedly!", actor_type);
                                Some(*actor_type)
                            } else if instance.last_pulse < deadline {
                                warn!("{:?} is unresponsive!", actor_type);
                                Some(*actor_type)
                            } else {
                                None
                            }
                        })
                        .collect();

                    for actor_type in failed {
                        if let Some(instance) = self.instances.remove(&actor_type) {
                            instance.retire();
                        }
                        *self.restarts.entry(actor_type).or_default() += 1;
                        self.spawn_actor(actor_type, &supervisor_tx);
                    }
                }
            }
        }

        info!("Supervisor stopping {} actor(s).", self.instances.len());
        for (_, instance) in self.instances.drain() {
            instance.retire();
        }
    }

    fn owner(&self, id: Uuid) -> Option<ActorType> {
        self.instances
            .iter()
            .find(|(_, instance)| instance.id == id)
            .map(|(actor_type, _)| *actor_type)
    }

    fn spawn_actor(&mut self, actor_type: ActorType, tx: &mpsc::Sender<ControlMessage>) {
        let Some(factory) = self.actor_factories.get(&actor_type) else {
            error!("No factory registered for {:?}", actor_type);
            return;
        };
        let mut new_actor = factory();
        let id = new_actor.id();

        let (actor_tx, mut actor_rx) = mpsc::channel::<ControlMessage>(64);
        let forward_tx = tx.clone();
        let relay = tokio::spawn(async move {
            while let Some(msg) = actor_rx.recv().await {
                if forward_tx.send(msg).await.is_err() {
                    break;
                }
            }
        });

        let handle = tokio::spawn(async move {
            if let Err(e) = new_actor.run(actor_tx).await {
                error!("Actor {:?} crashed: {}", actor_type, e);
            }
        });

        debug!("Spawned {:?} as {}", actor_type, id);
        self.instances.insert(
            actor_type,
            Instance {
                id,
                handle,
                relay,
                last_pulse: Instant::now(),
            },
        );
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}
