/// Capital ledger: wallet balance and per-session allocation.
///
/// Single source of truth for available funds. Every mutation is persisted
/// with a write-to-temp-then-rename so a reader never observes a partially
/// written file. The session-state flag guards against double settlement,
/// which would double-credit the wallet.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::core::EngineError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SessionState {
    Closed,
    Open,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WalletState {
    wallet_balance: f64,
    session_balance: f64,
    session: SessionState,
}

pub struct CapitalLedger {
    path: PathBuf,
    state: WalletState,
}

impl CapitalLedger {
    /// Loads wallet state from disk, falling back to `initial_balance`
    /// when no wallet file exists yet.
    pub fn load(path: &Path, initial_balance: f64) -> Result<Self, EngineError> {
        let state = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            serde_json::from_str(&content)?
        } else {
            warn!(path = %path.display(), initial_balance, "wallet file not found, starting fresh");
            WalletState {
                wallet_balance: initial_balance,
                session_balance: 0.0,
                session: SessionState::Closed,
            }
        };

        info!(
            wallet_balance = state.wallet_balance,
            session_balance = state.session_balance,
            "capital ledger loaded"
        );
        Ok(Self {
            path: path.to_path_buf(),
            state,
        })
    }

    pub fn wallet_balance(&self) -> f64 {
        self.state.wallet_balance
    }

    pub fn session_balance(&self) -> f64 {
        self.state.session_balance
    }

    pub fn session_state(&self) -> SessionState {
        self.state.session
    }

    /// Atomically debits the wallet and credits the session balance.
    ///
    /// Succeeds only if `0 < amount <= wallet_balance` and no session is
    /// already open against this wallet.
    pub fn allocate_session(&mut self, amount: f64) -> Result<(), EngineError> {
        if self.state.session == SessionState::Open {
            return Err(EngineError::SessionAlreadyOpen);
        }
        if amount <= 0.0 || amount > self.state.wallet_balance {
            return Err(EngineError::InsufficientFunds {
                requested: amount,
                available: self.state.wallet_balance,
            });
        }

        self.state.wallet_balance -= amount;
        self.state.session_balance = amount;
        self.state.session = SessionState::Open;
        self.persist()?;

        info!(
            allocated = amount,
            wallet_remaining = self.state.wallet_balance,
            "session capital allocated"
        );
        Ok(())
    }

    /// Credits session capital plus realized P&L back to the wallet and
    /// closes the session. Settling twice is rejected, never double-credited.
    pub fn settle_session(&mut self, pnl: f64) -> Result<f64, EngineError> {
        if self.state.session == SessionState::Closed {
            return Err(EngineError::NoOpenSession);
        }

        let returned = self.state.session_balance + pnl;
        self.state.wallet_balance += returned;
        self.state.session_balance = 0.0;
        self.state.session = SessionState::Closed;
        self.persist()?;

        info!(
            pnl,
            returned,
            wallet_balance = self.state.wallet_balance,
            "session settled"
        );
        Ok(self.state.wallet_balance)
    }

    /// Full rewrite through a temp file in the same directory, then an
    /// atomic rename over the live file.
    fn persist(&self) -> Result<(), EngineError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(&self.state)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_wallet_path(dir: &tempfile::TempDir) -> PathBuf {
        dir.path().join("wallet.json")
    }

    #[test]
    fn fresh_wallet_uses_initial_balance() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = CapitalLedger::load(&temp_wallet_path(&dir), 1000.0).unwrap();
        assert_eq!(ledger.wallet_balance(), 1000.0);
        assert_eq!(ledger.session_balance(), 0.0);
        assert_eq!(ledger.session_state(), SessionState::Closed);
    }

    #[test]
    fn allocate_then_settle_zero_is_a_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = CapitalLedger::load(&temp_wallet_path(&dir), 1000.0).unwrap();

        ledger.allocate_session(500.0).unwrap();
        assert_eq!(ledger.wallet_balance(), 500.0);
        assert_eq!(ledger.session_balance(), 500.0);

        ledger.settle_session(0.0).unwrap();
        assert_eq!(ledger.wallet_balance(), 1000.0);
        assert_eq!(ledger.session_balance(), 0.0);
    }

    #[test]
    fn settle_twice_never_double_credits() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = CapitalLedger::load(&temp_wallet_path(&dir), 1000.0).unwrap();

        ledger.allocate_session(400.0).unwrap();
        ledger.settle_session(50.0).unwrap();
        assert_eq!(ledger.wallet_balance(), 1050.0);

        let err = ledger.settle_session(50.0).err().unwrap();
        assert!(matches!(err, EngineError::NoOpenSession));
        assert_eq!(ledger.wallet_balance(), 1050.0);
    }

    #[test]
    fn over_allocation_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = CapitalLedger::load(&temp_wallet_path(&dir), 100.0).unwrap();

        assert!(matches!(
            ledger.allocate_session(100.01),
            Err(EngineError::InsufficientFunds { .. })
        ));
        assert!(matches!(
            ledger.allocate_session(0.0),
            Err(EngineError::InsufficientFunds { .. })
        ));
        assert_eq!(ledger.wallet_balance(), 100.0);
    }

    #[test]
    fn concurrent_session_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = CapitalLedger::load(&temp_wallet_path(&dir), 1000.0).unwrap();

        ledger.allocate_session(200.0).unwrap();
        assert!(matches!(
            ledger.allocate_session(200.0),
            Err(EngineError::SessionAlreadyOpen)
        ));
    }

    #[test]
    fn state_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_wallet_path(&dir);

        {
            let mut ledger = CapitalLedger::load(&path, 1000.0).unwrap();
            ledger.allocate_session(300.0).unwrap();
        }

        let reloaded = CapitalLedger::load(&path, 1000.0).unwrap();
        assert_eq!(reloaded.wallet_balance(), 700.0);
        assert_eq!(reloaded.session_balance(), 300.0);
        assert_eq!(reloaded.session_state(), SessionState::Open);
    }
}
