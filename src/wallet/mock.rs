//! In-memory wallet for tests

use std::sync::Mutex;

use async_trait::async_trait;
use bitcoin::key::{Keypair, Secp256k1};
use bitcoin::{Address, Network};

use super::{WalletCapabilities, WalletError, WalletProvider};

pub(crate) struct MockWallet {
    address: String,
    balance: Mutex<u64>,
    sends: Mutex<Vec<(String, u64)>>,
    fail_sends: Mutex<bool>,
}

impl MockWallet {
    pub fn new() -> Self {
        let secp = Secp256k1::new();
        let keypair = Keypair::from_seckey_slice(&secp, &[0x7f; 32]).unwrap();
        let (xonly, _) = keypair.x_only_public_key();
        let address = Address::p2tr(&secp, xonly, None, Network::Regtest).to_string();

        Self {
            address,
            balance: Mutex::new(100_000_000),
            sends: Mutex::new(Vec::new()),
            fail_sends: Mutex::new(false),
        }
    }

    pub fn sends(&self) -> Vec<(String, u64)> {
        self.sends.lock().unwrap().clone()
    }

    pub fn set_fail_sends(&self, fail: bool) {
        *self.fail_sends.lock().unwrap() = fail;
    }
}

#[async_trait]
impl WalletProvider for MockWallet {
    fn capabilities(&self) -> WalletCapabilities {
        WalletCapabilities {
            send: true,
            sweep: true,
            token_approval: false,
        }
    }

    async fn get_address(&self) -> Result<String, WalletError> {
        Ok(self.address.clone())
    }

    async fn get_balance(&self) -> Result<u64, WalletError> {
        Ok(*self.balance.lock().unwrap())
    }

    async fn send_to_address(
        &self,
        address: &str,
        amount_sat: u64,
        _sat_per_vbyte: u64,
    ) -> Result<String, WalletError> {
        if *self.fail_sends.lock().unwrap() {
            return Err(WalletError::InsufficientFunds {
                have: 0,
                need: amount_sat,
            });
        }

        let mut sends = self.sends.lock().unwrap();
        sends.push((address.to_string(), amount_sat));
        Ok(format!("mock_send_{}", sends.len()))
    }

    async fn sweep_wallet(
        &self,
        address: &str,
        _sat_per_vbyte: u64,
    ) -> Result<String, WalletError> {
        let balance = *self.balance.lock().unwrap();
        self.sends.lock().unwrap().push((address.to_string(), balance));
        Ok("mock_sweep".to_string())
    }
}
