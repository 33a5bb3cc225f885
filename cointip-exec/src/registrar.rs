//! User registration.
//!
//! A user is registered iff its row exists **and** it has one deposit
//! address per active coin. Registration creates the row and then the
//! addresses; any failure deletes the row again, so a half-registered user
//! is never left behind.

use tracing::{error, info, warn};

use cointip_domain::{CoinUnit, User, Username};

use crate::context::Services;
use crate::error::{ExecError, ExecResult};

/// Creates users and keeps their address coverage complete.
#[derive(Clone)]
pub struct Registrar {
    services: Services,
}

impl Registrar {
    /// Create a registrar.
    pub fn new(services: Services) -> Self {
        Self { services }
    }

    /// Whether `user` is fully registered.
    ///
    /// A row with no addresses is an aborted registration: it is deleted and
    /// the user reported as unregistered.
    ///
    /// # Errors
    /// `InvalidState` when the user has addresses for some active coins but
    /// not all of them (run [`Registrar::add_coin`] after enabling a coin).
    pub async fn is_registered(&self, user: &Username) -> ExecResult<bool> {
        let users = self.services.store.users();
        let Some(row) = users.find(user).await? else {
            return Ok(false);
        };

        if row.addresses.is_empty() {
            warn!(%user, "Deleting user row left by an aborted registration");
            users.delete(user).await?;
            return Ok(false);
        }

        let active = self.services.settings.active_coins();
        let missing: Vec<&str> = active
            .iter()
            .filter(|c| row.address(&c.unit).is_none())
            .map(|c| c.unit.as_str())
            .collect();
        if missing.is_empty() {
            Ok(true)
        } else {
            Err(ExecError::InvalidState(format!(
                "user {} has no address for {}",
                user,
                missing.join(", ")
            )))
        }
    }

    /// Register `user`: one new deposit address per active coin.
    ///
    /// Registering an already registered user returns the existing row.
    ///
    /// # Errors
    /// Ledger or store failures, after the partially created row was deleted.
    pub async fn register(&self, user: &Username) -> ExecResult<User> {
        if self.is_registered(user).await? {
            info!(%user, "Already registered");
            return self.load(user).await;
        }

        self.services.store.users().create(user).await?;
        if let Err(e) = self.allocate_addresses(user).await {
            error!(%user, error = %e, "Registration failed, removing user row");
            if let Err(cleanup) = self.services.store.users().delete(user).await {
                error!(%user, error = %cleanup, "Could not remove partially registered user");
            }
            return Err(e);
        }

        info!(%user, "Registered user");
        self.load(user).await
    }

    /// Give every registered user lacking one an address for `coin`.
    ///
    /// # Returns
    ///
    /// Number of addresses allocated.
    pub async fn add_coin(&self, coin: &CoinUnit) -> ExecResult<usize> {
        let users = self.services.store.users();
        let mut added = 0;
        for user in users.list().await? {
            // Rows without addresses are aborted registrations, not users
            if user.addresses.is_empty() || user.address(coin).is_some() {
                continue;
            }
            let address = self.services.ledger.new_address(coin, &user.name).await?;
            users.add_address(&user.name, coin, &address).await?;
            added += 1;
        }
        if added > 0 {
            info!(coin = %coin, added, "Allocated addresses for newly enabled coin");
        }
        Ok(added)
    }

    async fn allocate_addresses(&self, user: &Username) -> ExecResult<()> {
        for coin in self.services.settings.active_coins() {
            let address = self.services.ledger.new_address(&coin.unit, user).await?;
            self.services
                .store
                .users()
                .add_address(user, &coin.unit, &address)
                .await?;
        }
        Ok(())
    }

    async fn load(&self, user: &Username) -> ExecResult<User> {
        self.services
            .store
            .users()
            .find(user)
            .await?
            .ok_or_else(|| {
                ExecError::InvalidState(format!("user {} vanished after registration", user))
            })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::harness;
    use cointip_store::Store;

    fn user(name: &str) -> Username {
        Username::new(name).unwrap()
    }

    #[tokio::test]
    async fn test_register_allocates_all_coins() {
        let services = harness().services;
        let registrar = Registrar::new(services.clone());

        let row = registrar.register(&user("alice")).await.unwrap();
        assert_eq!(row.addresses.len(), 2);
        assert!(registrar.is_registered(&user("alice")).await.unwrap());

        // Second registration is a no-op
        let again = registrar.register(&user("alice")).await.unwrap();
        assert_eq!(again.addresses, row.addresses);
    }

    #[tokio::test]
    async fn test_failed_registration_rolls_back() {
        let h = harness();
        let (services, ledger) = (h.services, h.ledger);
        let registrar = Registrar::new(services.clone());

        // First address succeeds, second fails
        ledger.fail_after(1);
        assert!(registrar.register(&user("alice")).await.is_err());
        assert!(services.store.users().find(&user("alice")).await.unwrap().is_none());
        assert!(!registrar.is_registered(&user("alice")).await.unwrap());
    }

    #[tokio::test]
    async fn test_row_without_addresses_is_deleted() {
        let services = harness().services;
        let registrar = Registrar::new(services.clone());
        services.store.users().create(&user("ghost")).await.unwrap();

        assert!(!registrar.is_registered(&user("ghost")).await.unwrap());
        assert!(services.store.users().find(&user("ghost")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_partial_coverage_is_fatal_until_add_coin() {
        let services = harness().services;
        let registrar = Registrar::new(services.clone());
        let ltc = CoinUnit::new("ltc").unwrap();
        let users = services.store.users();
        users.create(&user("bob")).await.unwrap();
        users.add_address(&user("bob"), &ltc, "Lbob").await.unwrap();

        assert!(matches!(
            registrar.is_registered(&user("bob")).await,
            Err(ExecError::InvalidState(_))
        ));

        let btc = CoinUnit::new("btc").unwrap();
        assert_eq!(registrar.add_coin(&btc).await.unwrap(), 1);
        assert!(registrar.is_registered(&user("bob")).await.unwrap());
        assert_eq!(registrar.add_coin(&btc).await.unwrap(), 0);
    }
}
