pub mod adaptor;
pub mod arena_ledger_trie;
pub mod error;
pub mod ledger_trie;
pub mod seq_enforcer;
pub mod span;
pub mod validation_params;
pub mod validations;

#[cfg(test)]
pub(crate) mod test_utils;
