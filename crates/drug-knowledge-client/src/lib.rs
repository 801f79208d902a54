//! RxNav client for drug safety verification.
//!
//! This crate provides the production [`DrugKnowledgeSource`] backed by the
//! RxNav REST service: concept search, concept detail, synonyms, drug classes
//! and drug-drug interactions.
//!
//! [`DrugKnowledgeSource`]: drug_safety_core::DrugKnowledgeSource

mod client;
pub mod responses;

pub use client::RxNavClient;
