//   Copyright 2024 The Bywise Community
//   SPDX-License-Identifier: BSD-3-Clause

//! Key layout: `<table>-<chain>-<index>-<id>`. Chain names never contain `-`
//! (enforced at chain creation), so prefixes are unambiguous; numeric index
//! segments are zero-padded so lexicographic order matches numeric order.

pub const TABLE_BLOCKS: &str = "blocks";
pub const TABLE_TXS: &str = "txs";
pub const TABLE_SLICES: &str = "slices";
pub const TABLE_EVENTS: &str = "events";
pub const TABLE_ENV: &str = "env";
pub const TABLE_CHAINS: &str = "chains";

pub const INDEX_HASH: &str = "hash";
pub const INDEX_HEIGHT: &str = "height";
pub const INDEX_CREATED: &str = "created";
pub const INDEX_FROM: &str = "from";
pub const INDEX_TO: &str = "to";
pub const INDEX_FOREIGN_KEY: &str = "fk";
pub const INDEX_NAME: &str = "name";
pub const INDEX_KEY_VALUE: &str = "kv";
pub const INDEX_DATA: &str = "data";
pub const INDEX_META: &str = "meta";

pub fn key(table: &str, chain: &str, index: &str, id: &str) -> Vec<u8> {
    format!("{table}-{chain}-{index}-{id}").into_bytes()
}

pub fn prefix(table: &str, chain: &str, index: &str) -> Vec<u8> {
    format!("{table}-{chain}-{index}-").into_bytes()
}

/// Zero-padded so that `height_id(2) < height_id(10)` lexicographically.
pub fn padded(n: u64) -> String {
    format!("{n:020}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padded_orders_lexicographically() {
        assert!(padded(2) < padded(10));
        assert!(padded(99) < padded(100));
    }

    #[test]
    fn key_layout() {
        assert_eq!(
            key(TABLE_BLOCKS, "main", INDEX_HEIGHT, &padded(7)),
            b"blocks-main-height-00000000000000000007".to_vec()
        );
    }
}
