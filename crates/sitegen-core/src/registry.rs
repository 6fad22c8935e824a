//! AgentRegistry - one [`AgentSet`] per session, shared by every request.
//!
//! Sets are created on first access. Each agent tries to resume from its
//! persisted state; unreadable state degrades to a fresh agent and is
//! reported through [`LoadOutcome`].
//!
//! The registry is bounded by [`RegistryPolicy`]. Dropping a set loses
//! nothing: agents are persisted after every call and reload on the next
//! access. A set that is still in use is never dropped, so a session never
//! has two live sets; the bound may be exceeded until it is released.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::agents::{Agent, AgentError, AgentFactory, AgentRole, ImageAgent};
use crate::persistence::ArtifactStore;
use crate::session::SessionId;

/// A chat agent shared between the request path and background jobs.
pub type SharedAgent = Arc<Mutex<Box<dyn Agent>>>;

pub type SharedImageAgent = Arc<Mutex<ImageAgent>>;

/// How an agent's persisted state was handled at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Resumed from the state file.
    Loaded,
    /// No state file; started fresh.
    Absent,
    /// State file unreadable or invalid; started fresh.
    Corrupt(String),
}

/// Lifecycle policy for cached agent sets.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegistryPolicy {
    /// Keep at most this many sessions in memory, evicting the least
    /// recently used. `None` keeps every session until exit.
    pub max_sessions: Option<usize>,
}

impl RegistryPolicy {
    pub fn unbounded() -> Self {
        Self { max_sessions: None }
    }

    pub fn bounded(max_sessions: usize) -> Self {
        Self {
            max_sessions: Some(max_sessions.max(1)),
        }
    }
}

/// The agents of one session, one per role.
pub struct AgentSet {
    session_id: SessionId,
    orchestrator: SharedAgent,
    template: SharedAgent,
    title: SharedAgent,
    image: SharedImageAgent,
    outcomes: HashMap<AgentRole, LoadOutcome>,
}

impl AgentSet {
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn orchestrator(&self) -> &SharedAgent {
        &self.orchestrator
    }

    pub fn template(&self) -> &SharedAgent {
        &self.template
    }

    pub fn title(&self) -> &SharedAgent {
        &self.title
    }

    pub fn image(&self) -> &SharedImageAgent {
        &self.image
    }

    /// Chat agent for a role; `None` for the image role.
    pub fn chat_agent(&self, role: AgentRole) -> Option<&SharedAgent> {
        match role {
            AgentRole::Orchestrator => Some(&self.orchestrator),
            AgentRole::Template => Some(&self.template),
            AgentRole::Title => Some(&self.title),
            AgentRole::ImageGenerator => None,
        }
    }

    /// Whether anything outside the registry still holds this set or one of
    /// its agents, such as a request in progress or a background job.
    pub fn in_use(self: &Arc<Self>) -> bool {
        Arc::strong_count(self) > 1
            || [&self.orchestrator, &self.template, &self.title]
                .into_iter()
                .any(|agent| Arc::strong_count(agent) > 1)
            || Arc::strong_count(&self.image) > 1
    }

    pub fn load_outcome(&self, role: AgentRole) -> LoadOutcome {
        self.outcomes
            .get(&role)
            .cloned()
            .unwrap_or(LoadOutcome::Absent)
    }
}

struct CachedSet {
    agents: Arc<AgentSet>,
    last_access: u64,
}

#[derive(Default)]
struct Entries {
    sets: HashMap<SessionId, CachedSet>,
    clock: u64,
}

impl Entries {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}

/// Process-wide cache of agent sets keyed by session.
pub struct AgentRegistry {
    store: Arc<dyn ArtifactStore>,
    factory: Arc<dyn AgentFactory>,
    policy: RegistryPolicy,
    entries: Mutex<Entries>,
}

impl AgentRegistry {
    pub fn new(
        store: Arc<dyn ArtifactStore>,
        factory: Arc<dyn AgentFactory>,
        policy: RegistryPolicy,
    ) -> Self {
        Self {
            store,
            factory,
            policy,
            entries: Mutex::new(Entries::default()),
        }
    }

    /// Return the session's agents, building and loading them on first use.
    ///
    /// Concurrent first accesses may both build a set, but only one is ever
    /// cached and returned.
    pub fn get_or_create(&self, session_id: &SessionId) -> Arc<AgentSet> {
        if let Some(agents) = self.lookup(session_id) {
            return agents;
        }

        // Build outside the lock; loading touches the disk
        let built = Arc::new(self.build(session_id));

        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let tick = entries.tick();
        let agents = match entries.sets.entry(session_id.clone()) {
            Entry::Occupied(mut existing) => {
                existing.get_mut().last_access = tick;
                Arc::clone(&existing.get().agents)
            }
            Entry::Vacant(slot) => {
                log::info!("Created agent set for session {}", session_id);
                slot.insert(CachedSet {
                    agents: Arc::clone(&built),
                    last_access: tick,
                });
                built
            }
        };
        self.enforce_policy(&mut entries, session_id);
        agents
    }

    /// Clear the orchestrator and template conversations in place.
    ///
    /// Title and image agents are untouched and nothing is written; callers
    /// persist the reset state if they want it to survive.
    pub fn reset(&self, session_id: &SessionId) -> Result<Arc<AgentSet>, AgentError> {
        let agents = self.get_or_create(session_id);
        for agent in [agents.orchestrator(), agents.template()] {
            agent.lock().map_err(|_| AgentError::Poisoned)?.reset();
        }
        Ok(agents)
    }

    pub fn contains(&self, session_id: &SessionId) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .sets
            .contains_key(session_id)
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .sets
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lookup(&self, session_id: &SessionId) -> Option<Arc<AgentSet>> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let tick = entries.tick();
        entries.sets.get_mut(session_id).map(|cached| {
            cached.last_access = tick;
            Arc::clone(&cached.agents)
        })
    }

    fn enforce_policy(&self, entries: &mut Entries, keep: &SessionId) {
        let Some(max) = self.policy.max_sessions else {
            return;
        };

        while entries.sets.len() > max {
            let oldest = entries
                .sets
                .iter()
                .filter(|(id, cached)| *id != keep && !cached.agents.in_use())
                .min_by_key(|(_, cached)| cached.last_access)
                .map(|(id, _)| id.clone());

            match oldest {
                Some(id) => {
                    log::info!("Evicting agent set for session {}", id);
                    entries.sets.remove(&id);
                }
                None => break,
            }
        }
    }

    fn build(&self, session_id: &SessionId) -> AgentSet {
        let mut outcomes = HashMap::new();

        let mut chat = |role: AgentRole| -> SharedAgent {
            let mut agent = self.factory.chat_agent(role);
            let outcome = self.restore(session_id, role, |state| agent.restore_state(state));
            outcomes.insert(role, outcome);
            Arc::new(Mutex::new(agent))
        };

        let orchestrator = chat(AgentRole::Orchestrator);
        let template = chat(AgentRole::Template);
        let title = chat(AgentRole::Title);

        let mut image = self.factory.image_agent();
        let outcome = self.restore(session_id, AgentRole::ImageGenerator, |state| {
            image.restore_state(state)
        });
        outcomes.insert(AgentRole::ImageGenerator, outcome);

        AgentSet {
            session_id: session_id.clone(),
            orchestrator,
            template,
            title,
            image: Arc::new(Mutex::new(image)),
            outcomes,
        }
    }

    fn restore(
        &self,
        session_id: &SessionId,
        role: AgentRole,
        apply: impl FnOnce(&str) -> Result<(), AgentError>,
    ) -> LoadOutcome {
        match self.store.load_agent_state(session_id, role) {
            Ok(None) => LoadOutcome::Absent,
            Ok(Some(state)) => match apply(&state) {
                Ok(()) => LoadOutcome::Loaded,
                Err(e) => {
                    log::warn!(
                        "Discarding corrupt {} state for session {}: {}",
                        role,
                        session_id,
                        e
                    );
                    LoadOutcome::Corrupt(e.to_string())
                }
            },
            Err(e) => {
                log::warn!(
                    "Could not read {} state for session {}: {}",
                    role,
                    session_id,
                    e
                );
                LoadOutcome::Corrupt(e.to_string())
            }
        }
    }
}
