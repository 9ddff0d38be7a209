//! Swap Status
//!
//! The unified status enum shared by submarine, reverse and chain swaps,
//! together with the per-kind transition tables. Every status change goes
//! through `SwapStatus::can_transition`; an update that is not permitted by
//! the table is an invariant violation and must never be applied.

use serde::{Deserialize, Serialize};

/// Which lifecycle a swap record follows
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapKind {
    /// Onchain to Lightning
    Submarine,
    /// Lightning to onchain, hold invoice driven
    Reverse,
    /// Both sides onchain, one preimage
    Chain,
}

impl std::fmt::Display for SwapKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Submarine => "submarine",
            Self::Reverse => "reverse",
            Self::Chain => "chain",
        };
        write!(f, "{}", s)
    }
}

/// Unified swap status event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapStatus {
    /// Swap record created, waiting for the first action
    SwapCreated,
    /// Invoice attached (reverse: hold invoice issued)
    InvoiceSet,
    /// Lightning payment attempt in flight
    InvoicePending,
    /// Lockup transaction seen unconfirmed
    TransactionMempool,
    /// Lockup transaction confirmed (or zero-conf accepted)
    TransactionConfirmed,
    /// Invoice paid (submarine) or settled prepay seen
    InvoicePaid,
    /// Cooperative claim window open
    TransactionClaimPending,
    /// Claim transaction broadcast or observed
    TransactionClaimed,
    /// Timeout height reached without settlement
    SwapExpired,
    /// Lightning payment failed terminally
    InvoiceFailedToPay,
    /// Channel opened for an open-channel swap
    ChannelCreated,
    /// Prepay miner fee invoice settled
    MinerFeePaid,
    /// Lockup broadcast failed
    TransactionFailed,
    /// Refund transaction broadcast or observed
    TransactionRefunded,
    /// Lockup rejected (underpaid, evicted, non-standard)
    TransactionLockupFailed,
}

impl SwapStatus {
    /// The set of statuses a record in this status may transition to,
    /// for the given swap kind.
    pub fn successors(self, kind: SwapKind) -> &'static [SwapStatus] {
        use SwapStatus::*;

        match kind {
            SwapKind::Submarine => match self {
                SwapCreated => &[
                    InvoiceSet,
                    TransactionMempool,
                    TransactionLockupFailed,
                    SwapExpired,
                ],
                InvoiceSet => &[TransactionMempool, TransactionLockupFailed, SwapExpired],
                TransactionMempool => &[
                    TransactionConfirmed,
                    InvoicePending,
                    TransactionLockupFailed,
                    SwapExpired,
                ],
                TransactionConfirmed => &[
                    InvoicePending,
                    // Reorg that unconfirmed the lockup
                    TransactionMempool,
                    TransactionLockupFailed,
                    SwapExpired,
                ],
                InvoicePending => &[ChannelCreated, InvoicePaid, InvoiceFailedToPay, SwapExpired],
                ChannelCreated => &[InvoicePaid, InvoiceFailedToPay, SwapExpired],
                InvoicePaid => &[TransactionClaimPending, TransactionClaimed],
                TransactionClaimPending => &[TransactionClaimed],
                InvoiceFailedToPay => &[TransactionRefunded, SwapExpired],
                TransactionLockupFailed => &[TransactionRefunded, SwapExpired],
                SwapExpired => &[TransactionRefunded],
                TransactionClaimed | TransactionRefunded => &[],
                MinerFeePaid | TransactionFailed => &[],
            },
            SwapKind::Reverse => match self {
                SwapCreated => &[InvoiceSet, SwapExpired],
                InvoiceSet => &[
                    MinerFeePaid,
                    TransactionMempool,
                    TransactionFailed,
                    SwapExpired,
                ],
                MinerFeePaid => &[TransactionMempool, TransactionFailed, SwapExpired],
                TransactionMempool => &[TransactionConfirmed, TransactionClaimed, SwapExpired],
                TransactionConfirmed => &[
                    TransactionClaimed,
                    // Reorg that unconfirmed the lockup
                    TransactionMempool,
                    SwapExpired,
                ],
                TransactionFailed => &[SwapExpired],
                SwapExpired => &[TransactionRefunded],
                TransactionClaimed | TransactionRefunded => &[],
                InvoicePending | InvoicePaid | ChannelCreated | TransactionClaimPending
                | InvoiceFailedToPay | TransactionLockupFailed => &[],
            },
            SwapKind::Chain => match self {
                SwapCreated => &[TransactionMempool, TransactionLockupFailed, SwapExpired],
                TransactionMempool => &[
                    TransactionConfirmed,
                    TransactionLockupFailed,
                    SwapExpired,
                ],
                TransactionConfirmed => &[
                    TransactionClaimPending,
                    TransactionClaimed,
                    TransactionMempool,
                    SwapExpired,
                ],
                TransactionClaimPending => &[TransactionClaimed],
                TransactionLockupFailed => &[TransactionRefunded, SwapExpired],
                SwapExpired => &[TransactionRefunded],
                TransactionClaimed | TransactionRefunded => &[],
                _ => &[],
            },
        }
    }

    /// Whether a record may move from `self` to `to` under the given kind
    pub fn can_transition(self, kind: SwapKind, to: SwapStatus) -> bool {
        self != to && self.successors(kind).contains(&to)
    }

    /// Statuses from which no further transition is possible
    pub fn is_terminal(self, kind: SwapKind) -> bool {
        self.successors(kind).is_empty()
    }

    /// Statuses under which a submarine swap may be cooperatively refunded
    pub fn refund_eligible(self) -> bool {
        matches!(
            self,
            SwapStatus::SwapExpired
                | SwapStatus::InvoiceFailedToPay
                | SwapStatus::TransactionLockupFailed
        )
    }
}

impl std::fmt::Display for SwapStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::SwapCreated => "swap_created",
            Self::InvoiceSet => "invoice_set",
            Self::InvoicePending => "invoice_pending",
            Self::TransactionMempool => "transaction_mempool",
            Self::TransactionConfirmed => "transaction_confirmed",
            Self::InvoicePaid => "invoice_paid",
            Self::TransactionClaimPending => "transaction_claim_pending",
            Self::TransactionClaimed => "transaction_claimed",
            Self::SwapExpired => "swap_expired",
            Self::InvoiceFailedToPay => "invoice_failed_to_pay",
            Self::ChannelCreated => "channel_created",
            Self::MinerFeePaid => "miner_fee_paid",
            Self::TransactionFailed => "transaction_failed",
            Self::TransactionRefunded => "transaction_refunded",
            Self::TransactionLockupFailed => "transaction_lockup_failed",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for SwapStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "swap_created" => Ok(Self::SwapCreated),
            "invoice_set" => Ok(Self::InvoiceSet),
            "invoice_pending" => Ok(Self::InvoicePending),
            "transaction_mempool" => Ok(Self::TransactionMempool),
            "transaction_confirmed" => Ok(Self::TransactionConfirmed),
            "invoice_paid" => Ok(Self::InvoicePaid),
            "transaction_claim_pending" => Ok(Self::TransactionClaimPending),
            "transaction_claimed" => Ok(Self::TransactionClaimed),
            "swap_expired" => Ok(Self::SwapExpired),
            "invoice_failed_to_pay" => Ok(Self::InvoiceFailedToPay),
            "channel_created" => Ok(Self::ChannelCreated),
            "miner_fee_paid" => Ok(Self::MinerFeePaid),
            "transaction_failed" => Ok(Self::TransactionFailed),
            "transaction_refunded" => Ok(Self::TransactionRefunded),
            "transaction_lockup_failed" => Ok(Self::TransactionLockupFailed),
            _ => Err(format!("unknown status: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SwapStatus::*;

    #[test]
    fn test_submarine_happy_path() {
        let path = [
            SwapCreated,
            TransactionMempool,
            TransactionConfirmed,
            InvoicePending,
            InvoicePaid,
            TransactionClaimPending,
            TransactionClaimed,
        ];
        for pair in path.windows(2) {
            assert!(
                pair[0].can_transition(SwapKind::Submarine, pair[1]),
                "{} -> {} should be allowed",
                pair[0],
                pair[1]
            );
        }
        assert!(TransactionClaimed.is_terminal(SwapKind::Submarine));
    }

    #[test]
    fn test_submarine_rejects_skips() {
        assert!(!SwapCreated.can_transition(SwapKind::Submarine, InvoicePaid));
        assert!(!TransactionMempool.can_transition(SwapKind::Submarine, TransactionClaimed));
        assert!(!TransactionClaimed.can_transition(SwapKind::Submarine, SwapCreated));
        // No self-transitions
        assert!(!TransactionMempool.can_transition(SwapKind::Submarine, TransactionMempool));
    }

    #[test]
    fn test_submarine_reorg_rollback() {
        assert!(TransactionConfirmed.can_transition(SwapKind::Submarine, TransactionMempool));
        assert!(TransactionConfirmed.can_transition(SwapKind::Reverse, TransactionMempool));
    }

    #[test]
    fn test_submarine_failure_paths() {
        assert!(TransactionMempool.can_transition(SwapKind::Submarine, TransactionLockupFailed));
        assert!(TransactionLockupFailed.can_transition(SwapKind::Submarine, SwapExpired));
        assert!(InvoiceFailedToPay.can_transition(SwapKind::Submarine, TransactionRefunded));
        assert!(SwapExpired.can_transition(SwapKind::Submarine, TransactionRefunded));
    }

    #[test]
    fn test_reverse_happy_path() {
        let path = [
            SwapCreated,
            InvoiceSet,
            TransactionMempool,
            TransactionConfirmed,
            TransactionClaimed,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition(SwapKind::Reverse, pair[1]));
        }
    }

    #[test]
    fn test_reverse_prepay_and_refund() {
        assert!(InvoiceSet.can_transition(SwapKind::Reverse, MinerFeePaid));
        assert!(MinerFeePaid.can_transition(SwapKind::Reverse, TransactionMempool));
        assert!(InvoiceSet.can_transition(SwapKind::Reverse, SwapExpired));
        assert!(SwapExpired.can_transition(SwapKind::Reverse, TransactionRefunded));
        // A reverse swap never pays an invoice itself
        assert!(!InvoiceSet.can_transition(SwapKind::Reverse, InvoicePending));
    }

    #[test]
    fn test_refund_eligibility() {
        assert!(SwapExpired.refund_eligible());
        assert!(InvoiceFailedToPay.refund_eligible());
        assert!(TransactionLockupFailed.refund_eligible());
        assert!(!InvoicePaid.refund_eligible());
        assert!(!TransactionMempool.refund_eligible());
    }

    #[test]
    fn test_display_round_trip() {
        for status in [
            SwapCreated,
            InvoiceSet,
            InvoicePending,
            TransactionMempool,
            TransactionConfirmed,
            InvoicePaid,
            TransactionClaimPending,
            TransactionClaimed,
            SwapExpired,
            InvoiceFailedToPay,
            ChannelCreated,
            MinerFeePaid,
            TransactionFailed,
            TransactionRefunded,
            TransactionLockupFailed,
        ] {
            let parsed: SwapStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }
}
