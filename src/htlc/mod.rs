//! Taproot Swap Trees
//!
//! Every swap locks coins to a taproot output whose internal key is the
//! MuSig2 aggregate of the two counterparty keys. The script tree carries
//! two leaves:
//!
//! - claim leaf: preimage-gated spend for the claiming side
//! - refund leaf: timelocked spend for the refunding side
//!
//! The cooperative path spends through the aggregated internal key; the
//! leaves are the unilateral fallback.

use bitcoin::absolute::LockTime;
use bitcoin::hashes::{sha256, Hash as _};
use bitcoin::key::{Keypair, Secp256k1};
use bitcoin::opcodes::all::*;
use bitcoin::script::Builder as ScriptBuilder;
use bitcoin::secp256k1::Message;
use bitcoin::sighash::{Prevouts, SighashCache, TapSighashType};
use bitcoin::taproot::{ControlBlock, LeafVersion, TaprootBuilder, TaprootSpendInfo};
use bitcoin::transaction::Version;
use bitcoin::{
    Address, Amount, Network, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid,
    Witness, XOnlyPublicKey,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Tapscript leaf version used for all swap leaves
pub const LEAF_VERSION: u8 = 0xc0;

/// Approximate vsize of a one-input one-output script-path spend
const SCRIPT_SPEND_VSIZE: u64 = 165;

/// Outputs below this are not worth claiming
const DUST_LIMIT: u64 = 546;

/// Swap tree errors
#[derive(Debug, Error)]
pub enum HtlcError {
    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("invalid script: {0}")]
    InvalidScript(String),

    #[error("taproot build failed")]
    TaprootBuildFailed,

    #[error("signing failed: {0}")]
    SigningFailed(String),

    #[error("amount too small after fees: {0} sat")]
    AmountTooSmall(u64),

    #[error("invalid transaction: {0}")]
    InvalidTransaction(String),
}

/// One leaf of a swap tree, as handed to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapTreeLeaf {
    pub version: u8,
    /// Leaf script (hex)
    pub output: String,
}

/// Serializable swap tree
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapTree {
    pub claim_leaf: SwapTreeLeaf,
    pub refund_leaf: SwapTreeLeaf,
}

/// A fully constructed swap HTLC
pub struct HtlcTree {
    pub claim_script: ScriptBuf,
    pub refund_script: ScriptBuf,
    /// MuSig2 aggregate of (claim key, refund key)
    pub internal_key: XOnlyPublicKey,
    pub spend_info: TaprootSpendInfo,
}

/// Build the claim leaf:
/// `OP_SIZE 32 OP_EQUALVERIFY OP_SHA256 <hash> OP_EQUALVERIFY <key> OP_CHECKSIG`
pub fn claim_leaf_script(preimage_hash: &[u8; 32], claim_key: &XOnlyPublicKey) -> ScriptBuf {
    ScriptBuilder::new()
        .push_opcode(OP_SIZE)
        .push_int(32)
        .push_opcode(OP_EQUALVERIFY)
        .push_opcode(OP_SHA256)
        .push_slice(preimage_hash)
        .push_opcode(OP_EQUALVERIFY)
        .push_x_only_key(claim_key)
        .push_opcode(OP_CHECKSIG)
        .into_script()
}

/// Build the refund leaf:
/// `<key> OP_CHECKSIGVERIFY <height> OP_CLTV`
pub fn refund_leaf_script(refund_key: &XOnlyPublicKey, timeout_height: u32) -> ScriptBuf {
    ScriptBuilder::new()
        .push_x_only_key(refund_key)
        .push_opcode(OP_CHECKSIGVERIFY)
        .push_int(timeout_height as i64)
        .push_opcode(OP_CLTV)
        .into_script()
}

/// Aggregate the two counterparty keys into the taproot internal key.
///
/// Key order is (claim, refund); both sides must use the same order for the
/// aggregate to match.
pub fn aggregate_internal_key(
    claim_key_hex: &str,
    refund_key_hex: &str,
) -> Result<XOnlyPublicKey, HtlcError> {
    use secp256k1::musig::KeyAggCache;
    use secp256k1::PublicKey;

    let parse = |hex_key: &str| -> Result<PublicKey, HtlcError> {
        let bytes = hex::decode(hex_key).map_err(|e| HtlcError::InvalidKey(e.to_string()))?;
        PublicKey::from_slice(&bytes).map_err(|e| HtlcError::InvalidKey(e.to_string()))
    };

    let claim = parse(claim_key_hex)?;
    let refund = parse(refund_key_hex)?;

    let cache = KeyAggCache::new(&[&claim, &refund]);
    XOnlyPublicKey::from_slice(&cache.agg_pk().serialize())
        .map_err(|e| HtlcError::InvalidKey(e.to_string()))
}

impl HtlcTree {
    /// Build the tree for a swap.
    ///
    /// For submarine swaps the claim key is the service's and the refund key
    /// the client's; reverse swaps flip the roles.
    pub fn new(
        preimage_hash: &[u8; 32],
        claim_key_hex: &str,
        refund_key_hex: &str,
        timeout_height: u32,
    ) -> Result<Self, HtlcError> {
        let parse_xonly = |hex_key: &str| -> Result<XOnlyPublicKey, HtlcError> {
            let bytes = hex::decode(hex_key).map_err(|e| HtlcError::InvalidKey(e.to_string()))?;
            // Compressed keys carry a parity byte the leaves do not need
            let xonly_bytes = if bytes.len() == 33 { &bytes[1..] } else { &bytes[..] };
            XOnlyPublicKey::from_slice(xonly_bytes)
                .map_err(|e| HtlcError::InvalidKey(e.to_string()))
        };

        let claim_script = claim_leaf_script(preimage_hash, &parse_xonly(claim_key_hex)?);
        let refund_script = refund_leaf_script(&parse_xonly(refund_key_hex)?, timeout_height);
        let internal_key = aggregate_internal_key(claim_key_hex, refund_key_hex)?;

        let secp = Secp256k1::new();
        let spend_info = TaprootBuilder::new()
            .add_leaf(1, claim_script.clone())
            .and_then(|b| b.add_leaf(1, refund_script.clone()))
            .map_err(|_| HtlcError::TaprootBuildFailed)?
            .finalize(&secp, internal_key)
            .map_err(|_| HtlcError::TaprootBuildFailed)?;

        Ok(Self {
            claim_script,
            refund_script,
            internal_key,
            spend_info,
        })
    }

    /// The taproot lockup address
    pub fn address(&self, network: Network) -> Address {
        Address::p2tr_tweaked(self.spend_info.output_key(), network)
    }

    /// Script pubkey of the lockup output
    pub fn lockup_script(&self) -> ScriptBuf {
        ScriptBuf::new_p2tr_tweaked(self.spend_info.output_key())
    }

    /// Merkle root of the script tree, as bytes for the MuSig2 key tweak
    pub fn merkle_root(&self) -> Option<[u8; 32]> {
        self.spend_info
            .merkle_root()
            .map(|root| root.to_byte_array())
    }

    /// Serializable view for API responses
    pub fn swap_tree(&self) -> SwapTree {
        SwapTree {
            claim_leaf: SwapTreeLeaf {
                version: LEAF_VERSION,
                output: hex::encode(self.claim_script.as_bytes()),
            },
            refund_leaf: SwapTreeLeaf {
                version: LEAF_VERSION,
                output: hex::encode(self.refund_script.as_bytes()),
            },
        }
    }

    fn control_block(&self, script: &ScriptBuf) -> Result<ControlBlock, HtlcError> {
        self.spend_info
            .control_block(&(script.clone(), LeafVersion::TapScript))
            .ok_or_else(|| HtlcError::InvalidScript("script not in tree".to_string()))
    }

    /// Build and sign a script-path claim spending the lockup with the
    /// revealed preimage.
    #[allow(clippy::too_many_arguments)]
    pub fn build_claim(
        &self,
        lockup_txid: &str,
        lockup_vout: u32,
        lockup_amount: u64,
        preimage: &[u8; 32],
        claim_keypair: &Keypair,
        destination: &Address,
        fee_per_vbyte: u64,
    ) -> Result<Transaction, HtlcError> {
        let mut tx = self.spend_template(
            lockup_txid,
            lockup_vout,
            lockup_amount,
            destination,
            fee_per_vbyte,
            Sequence::MAX,
            LockTime::ZERO,
        )?;

        let signature = self.sign_leaf(
            &tx,
            0,
            lockup_amount,
            &self.claim_script,
            claim_keypair,
        )?;

        let control = self.control_block(&self.claim_script)?;
        // Stack order: preimage on top for OP_SIZE, signature below for the
        // final OP_CHECKSIG
        tx.input[0].witness = Witness::from_slice(&[
            signature.to_vec().as_slice(),
            preimage.as_slice(),
            self.claim_script.as_bytes(),
            control.serialize().as_slice(),
        ]);

        Ok(tx)
    }

    /// Build and sign a script-path refund after the timeout height.
    pub fn build_refund(
        &self,
        lockup_txid: &str,
        lockup_vout: u32,
        lockup_amount: u64,
        timeout_height: u32,
        refund_keypair: &Keypair,
        destination: &Address,
        fee_per_vbyte: u64,
    ) -> Result<Transaction, HtlcError> {
        let lock_time = LockTime::from_height(timeout_height)
            .map_err(|e| HtlcError::InvalidTransaction(e.to_string()))?;

        let mut tx = self.spend_template(
            lockup_txid,
            lockup_vout,
            lockup_amount,
            destination,
            fee_per_vbyte,
            // CLTV requires a non-final sequence
            Sequence::ENABLE_LOCKTIME_NO_RBF,
            lock_time,
        )?;

        let signature = self.sign_leaf(
            &tx,
            0,
            lockup_amount,
            &self.refund_script,
            refund_keypair,
        )?;

        let control = self.control_block(&self.refund_script)?;
        tx.input[0].witness = Witness::from_slice(&[
            signature.to_vec().as_slice(),
            self.refund_script.as_bytes(),
            control.serialize().as_slice(),
        ]);

        Ok(tx)
    }

    #[allow(clippy::too_many_arguments)]
    fn spend_template(
        &self,
        lockup_txid: &str,
        lockup_vout: u32,
        lockup_amount: u64,
        destination: &Address,
        fee_per_vbyte: u64,
        sequence: Sequence,
        lock_time: LockTime,
    ) -> Result<Transaction, HtlcError> {
        let txid: Txid = lockup_txid
            .parse()
            .map_err(|_| HtlcError::InvalidTransaction(format!("bad txid {}", lockup_txid)))?;

        let fee = SCRIPT_SPEND_VSIZE * fee_per_vbyte.max(1);
        let send_amount = lockup_amount.saturating_sub(fee);
        if send_amount < DUST_LIMIT {
            return Err(HtlcError::AmountTooSmall(send_amount));
        }

        Ok(Transaction {
            version: Version::TWO,
            lock_time,
            input: vec![TxIn {
                previous_output: OutPoint {
                    txid,
                    vout: lockup_vout,
                },
                script_sig: ScriptBuf::new(),
                sequence,
                witness: Witness::new(),
            }],
            output: vec![TxOut {
                value: Amount::from_sat(send_amount),
                script_pubkey: destination.script_pubkey(),
            }],
        })
    }

    fn sign_leaf(
        &self,
        tx: &Transaction,
        input_index: usize,
        lockup_amount: u64,
        script: &ScriptBuf,
        keypair: &Keypair,
    ) -> Result<bitcoin::taproot::Signature, HtlcError> {
        let secp = Secp256k1::new();
        let prevout = TxOut {
            value: Amount::from_sat(lockup_amount),
            script_pubkey: self.lockup_script(),
        };
        let prevouts = [prevout];

        let leaf_hash =
            bitcoin::taproot::TapLeafHash::from_script(script, LeafVersion::TapScript);

        let sighash = SighashCache::new(tx)
            .taproot_script_spend_signature_hash(
                input_index,
                &Prevouts::All(&prevouts),
                leaf_hash,
                TapSighashType::Default,
            )
            .map_err(|e| HtlcError::SigningFailed(e.to_string()))?;

        let msg = Message::from_digest(sighash.to_byte_array());
        let signature = secp.sign_schnorr(&msg, keypair);

        Ok(bitcoin::taproot::Signature {
            signature,
            sighash_type: TapSighashType::Default,
        })
    }
}

/// Build an unsigned key-path spend of a lockup output. Used for
/// cooperative MuSig2 claims where the witness is attached after the
/// signing session completes.
pub fn build_key_spend_template(
    lockup_txid: &str,
    lockup_vout: u32,
    lockup_amount: u64,
    destination: &Address,
    fee_per_vbyte: u64,
) -> Result<Transaction, HtlcError> {
    const KEY_SPEND_VSIZE: u64 = 111;

    let txid: Txid = lockup_txid
        .parse()
        .map_err(|_| HtlcError::InvalidTransaction(format!("bad txid {}", lockup_txid)))?;

    let fee = KEY_SPEND_VSIZE * fee_per_vbyte.max(1);
    let send_amount = lockup_amount.saturating_sub(fee);
    if send_amount < DUST_LIMIT {
        return Err(HtlcError::AmountTooSmall(send_amount));
    }

    Ok(Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint {
                txid,
                vout: lockup_vout,
            },
            script_sig: ScriptBuf::new(),
            sequence: Sequence::MAX,
            witness: Witness::new(),
        }],
        output: vec![TxOut {
            value: Amount::from_sat(send_amount),
            script_pubkey: destination.script_pubkey(),
        }],
    })
}

/// Taproot key-spend sighash of a transaction input against the lockup
/// output, used to bind MuSig2 cooperative sessions to the spending
/// transaction.
pub fn key_spend_sighash(
    tx: &Transaction,
    input_index: usize,
    lockup_script: &ScriptBuf,
    lockup_amount: u64,
) -> Result<[u8; 32], HtlcError> {
    let prevouts = [TxOut {
        value: Amount::from_sat(lockup_amount),
        script_pubkey: lockup_script.clone(),
    }];

    let sighash = SighashCache::new(tx)
        .taproot_key_spend_signature_hash(
            input_index,
            &Prevouts::All(&prevouts),
            TapSighashType::Default,
        )
        .map_err(|e| HtlcError::SigningFailed(e.to_string()))?;

    Ok(sighash.to_byte_array())
}

/// Search a claim witness for the 32-byte preimage matching the hash
pub fn extract_preimage(witness: &[Vec<u8>], preimage_hash: &[u8; 32]) -> Option<[u8; 32]> {
    witness.iter().find_map(|item| {
        if item.len() != 32 {
            return None;
        }
        let hash = sha256::Hash::hash(item).to_byte_array();
        if &hash == preimage_hash {
            let mut preimage = [0u8; 32];
            preimage.copy_from_slice(item);
            Some(preimage)
        } else {
            None
        }
    })
}

/// Parse a raw transaction from hex
pub fn parse_transaction(tx_hex: &str) -> Result<Transaction, HtlcError> {
    let bytes = hex::decode(tx_hex).map_err(|e| HtlcError::InvalidTransaction(e.to_string()))?;
    bitcoin::consensus::deserialize(&bytes)
        .map_err(|e| HtlcError::InvalidTransaction(e.to_string()))
}

/// Serialize a transaction to hex
pub fn serialize_transaction(tx: &Transaction) -> String {
    bitcoin::consensus::encode::serialize_hex(tx)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLAIM_KEY: &str = "02d4c41c9c8455626d4d99525e05ec0d28a3665f27494e0ca41cbabfeb82e9e9f4";
    const REFUND_KEY: &str = "03e7e03bda22e0ca6372b9a8a2178e51d86ae358b973463ee2ae8e29b8c7ce335a";

    fn sample_hash() -> [u8; 32] {
        sha256::Hash::hash(b"preimage").to_byte_array()
    }

    #[test]
    fn test_tree_construction() {
        let tree = HtlcTree::new(&sample_hash(), CLAIM_KEY, REFUND_KEY, 800_000).unwrap();

        // Both leaves are in the tree and addressable
        assert!(tree.control_block(&tree.claim_script).is_ok());
        assert!(tree.control_block(&tree.refund_script).is_ok());
        assert!(tree.merkle_root().is_some());

        let address = tree.address(Network::Regtest);
        assert!(address.to_string().starts_with("bcrt1p"));
    }

    #[test]
    fn test_tree_is_deterministic() {
        let a = HtlcTree::new(&sample_hash(), CLAIM_KEY, REFUND_KEY, 800_000).unwrap();
        let b = HtlcTree::new(&sample_hash(), CLAIM_KEY, REFUND_KEY, 800_000).unwrap();
        assert_eq!(
            a.address(Network::Regtest).to_string(),
            b.address(Network::Regtest).to_string()
        );

        // A different timeout changes the refund leaf and thus the address
        let c = HtlcTree::new(&sample_hash(), CLAIM_KEY, REFUND_KEY, 800_001).unwrap();
        assert_ne!(
            a.address(Network::Regtest).to_string(),
            c.address(Network::Regtest).to_string()
        );
    }

    #[test]
    fn test_leaf_scripts_embed_parameters() {
        let hash = sample_hash();
        let tree = HtlcTree::new(&hash, CLAIM_KEY, REFUND_KEY, 800_000).unwrap();

        let claim_hex = hex::encode(tree.claim_script.as_bytes());
        assert!(claim_hex.contains(&hex::encode(hash)));
        // x-only part of the claim key
        assert!(claim_hex.contains(&CLAIM_KEY[2..]));

        let refund_hex = hex::encode(tree.refund_script.as_bytes());
        assert!(refund_hex.contains(&REFUND_KEY[2..]));
    }

    #[test]
    fn test_claim_transaction_witness_layout() {
        let secp = Secp256k1::new();
        let keypair = Keypair::from_seckey_slice(&secp, &[0x11; 32]).unwrap();
        let claim_key_hex = hex::encode(keypair.public_key().serialize());

        let preimage = [0x42u8; 32];
        let hash = sha256::Hash::hash(&preimage).to_byte_array();
        let tree = HtlcTree::new(&hash, &claim_key_hex, REFUND_KEY, 800_000).unwrap();

        let destination = tree.address(Network::Regtest);
        let tx = tree
            .build_claim(
                &"11".repeat(32),
                0,
                1_000_000,
                &preimage,
                &keypair,
                &destination,
                2,
            )
            .unwrap();

        assert_eq!(tx.input.len(), 1);
        assert_eq!(tx.output.len(), 1);
        let witness: Vec<_> = tx.input[0].witness.iter().collect();
        assert_eq!(witness.len(), 4);
        // Preimage sits above the signature
        assert_eq!(witness[1], preimage.as_slice());
        assert_eq!(witness[2], tree.claim_script.as_bytes());

        // Fee was deducted
        assert!(tx.output[0].value.to_sat() < 1_000_000);
    }

    #[test]
    fn test_refund_transaction_locktime() {
        let secp = Secp256k1::new();
        let keypair = Keypair::from_seckey_slice(&secp, &[0x22; 32]).unwrap();
        let refund_key_hex = hex::encode(keypair.public_key().serialize());

        let tree = HtlcTree::new(&sample_hash(), CLAIM_KEY, &refund_key_hex, 800_000).unwrap();
        let destination = tree.address(Network::Regtest);

        let tx = tree
            .build_refund(&"22".repeat(32), 1, 500_000, 800_000, &keypair, &destination, 2)
            .unwrap();

        assert_eq!(tx.lock_time, LockTime::from_height(800_000).unwrap());
        assert_ne!(tx.input[0].sequence, Sequence::MAX);
        assert_eq!(tx.input[0].witness.len(), 3);
    }

    #[test]
    fn test_dust_rejected() {
        let secp = Secp256k1::new();
        let keypair = Keypair::from_seckey_slice(&secp, &[0x11; 32]).unwrap();
        let claim_key_hex = hex::encode(keypair.public_key().serialize());
        let preimage = [0x42u8; 32];
        let hash = sha256::Hash::hash(&preimage).to_byte_array();
        let tree = HtlcTree::new(&hash, &claim_key_hex, REFUND_KEY, 800_000).unwrap();
        let destination = tree.address(Network::Regtest);

        let result = tree.build_claim(
            &"11".repeat(32),
            0,
            700,
            &preimage,
            &keypair,
            &destination,
            2,
        );
        assert!(matches!(result, Err(HtlcError::AmountTooSmall(_))));
    }

    #[test]
    fn test_preimage_extraction() {
        let preimage = [0x07u8; 32];
        let hash = sha256::Hash::hash(&preimage).to_byte_array();

        let witness = vec![
            vec![0x01; 64],
            preimage.to_vec(),
            vec![0x51],
        ];
        assert_eq!(extract_preimage(&witness, &hash), Some(preimage));

        // Wrong preimage
        let witness = vec![vec![0x01; 64], vec![0x08; 32]];
        assert_eq!(extract_preimage(&witness, &hash), None);

        // Right bytes, wrong length
        let witness = vec![preimage[..31].to_vec()];
        assert_eq!(extract_preimage(&witness, &hash), None);
    }
}
