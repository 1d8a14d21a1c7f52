//! Business logic services

pub mod circulation;
pub mod inventory;
pub mod ledger;
pub mod presence;

use crate::{config::CirculationConfig, qr::QrTokenCodec, repository::Repository};

/// Container for all services
#[derive(Clone)]
pub struct Services {
    pub repository: Repository,
    pub inventory: inventory::InventoryStore,
    pub presence: presence::PresenceTracker,
    pub ledger: ledger::CirculationLedger,
    pub circulation: circulation::CirculationService,
}

impl Services {
    /// Wire every service on top of the given repository
    pub fn new(repository: Repository, config: &CirculationConfig) -> Self {
        let inventory = inventory::InventoryStore::new(repository.clone());
        let presence = presence::PresenceTracker::new(repository.clone());
        let ledger = ledger::CirculationLedger::new(
            repository.clone(),
            presence.clone(),
            inventory.clone(),
        );
        let circulation = circulation::CirculationService::new(
            QrTokenCodec::new(config.library_token.clone()),
            repository.clone(),
            presence.clone(),
            ledger.clone(),
        );

        Self {
            repository,
            inventory,
            presence,
            ledger,
            circulation,
        }
    }
}
