//! Bootstrap snapshot persistence
//!
//! `record_bootstrap` is called after every patch applied in full-sync mode:
//! it freezes the current frontier of both trees into a `Bootstrap` row so a
//! light client can later resume from that row's proofs via
//! [`crate::proof::starting_leaf_proof`] instead of replaying the whole
//! history.

use serde_json::json;

use crate::db::{Document, DocFilter, Transaction, UpsertSpec};
use crate::value::{Fr, ValueCodec, U256};

/// Serialize the current frontier of both trees into a `Bootstrap` row.
/// When `header` is `Some`, the row is upserted by `block_hash` and a
/// matching `Block { hash }` row is ensured; otherwise an unkeyed row is
/// inserted (most recent bootstrap for a headerless/light deployment).
pub fn record_bootstrap(
    tx: &mut Transaction,
    header: Option<&str>,
    utxo_siblings: &[Fr],
    withdrawal_siblings: &[U256],
) {
    let utxo_bootstrap: Vec<String> = utxo_siblings.iter().map(|s| s.encode()).collect();
    let withdrawal_bootstrap: Vec<String> = withdrawal_siblings.iter().map(|s| s.encode()).collect();

    let mut doc = Document::new();
    doc.insert("utxo_bootstrap".to_string(), json!(utxo_bootstrap));
    doc.insert("withdrawal_bootstrap".to_string(), json!(withdrawal_bootstrap));

    match header {
        Some(block_hash) => {
            doc.insert("block_hash".to_string(), json!(block_hash));

            let mut where_ = DocFilter::new();
            where_.insert("block_hash".to_string(), json!(block_hash));
            tx.stage_upsert(
                "bootstrap",
                UpsertSpec { where_, update: doc.clone(), create: doc, constraint_key: "block_hash".to_string() },
            );

            let mut block_doc = Document::new();
            block_doc.insert("hash".to_string(), json!(block_hash));
            let mut block_where = DocFilter::new();
            block_where.insert("hash".to_string(), json!(block_hash));
            tx.stage_upsert(
                "block",
                UpsertSpec {
                    where_: block_where,
                    update: block_doc.clone(),
                    create: block_doc,
                    constraint_key: "hash".to_string(),
                },
            );
        }
        None => {
            doc.insert("block_hash".to_string(), serde_json::Value::Null);
            tx.stage_create("bootstrap", doc);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyed_bootstrap_stages_a_bootstrap_and_a_block_row() {
        let mut tx = Transaction::new();
        record_bootstrap(&mut tx, Some("0xdead"), &[Fr::from(1u64)], &[U256::from(2u64)]);
        assert_eq!(tx.ops().len(), 2);
    }

    #[test]
    fn unkeyed_bootstrap_stages_only_a_bootstrap_row() {
        let mut tx = Transaction::new();
        record_bootstrap(&mut tx, None, &[Fr::from(1u64)], &[U256::from(2u64)]);
        assert_eq!(tx.ops().len(), 1);
    }
}
