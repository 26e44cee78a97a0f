//! Resume Intelligence Engine — durable job queue, resume extraction
//! pipeline, and agentic candidate matching engine.
//!
//! This crate ingests resume documents, extracts structured candidate
//! profiles with an external LLM, persists them with vector embeddings for
//! semantic retrieval, and scores candidates against job requirements
//! through a multi-step agentic RAG pipeline.
//!
//! # Components
//!
//! | # | Component | Module |
//! |---|-----------|--------|
//! | C1 | Persistence Gateway | [`persistence`] |
//! | C2 | LLM Gateway | [`llm`] |
//! | C3 | File Parser | [`parser`] |
//! | C4 | Embedding Chunker | [`embeddings`] |
//! | C5 | Job Queue Store | [`jobs`] |
//! | C6 | Scheduler | [`jobs`] |
//! | C7 | Resume Job Processor | [`pipeline`] |
//! | C8 | Enrichment Store & Fetchers | [`enrichment`] |
//! | C9 | Agentic Matching Engine | [`matching`] |
//! | C10 | Audit Store | [`audit`] |
//! | C11 | Process Tracker | [`tracker`] |
//! | C12 | Feature-flag Router | [`router`] |
//!
//! Out of scope: auth/RBAC enforcement beyond accepting a pre-authenticated
//! [`model::CallerIdentity`], the GraphQL/REST transport layer, the web UI,
//! deployment tooling, schema migrations, skill-master CRUD, employee/
//! feedback CRUD, a log shipper, and the LLM/web-search services themselves
//! (consumed as black-box HTTP endpoints).

#![warn(missing_docs)]
#![allow(clippy::too_many_arguments)]

pub mod audit;
pub mod config;
pub mod embeddings;
pub mod enrichment;
pub mod errors;
pub mod jobs;
pub mod llm;
pub mod matching;
pub mod model;
pub mod parser;
pub mod persistence;
pub mod pipeline;
pub mod router;
pub mod tracker;

pub use config::RuntimeConfig;
pub use errors::{Result, RetryClass, RuntimeError};
pub use model::{
    CallerIdentity, Candidate, CandidateExternalProfile, CandidateMatch, ExternalProfileSource,
    ExternalProfileStatus, JobRequirement, JobStatus, JobType, MatchAudit, MatchAuditStatus,
    ProcessTracker, ProcessTrackerStatus, ResumeEmbedding,
};

pub use audit::AuditStore;
pub use enrichment::{EnrichmentStore, Fetcher, FetcherRegistry};
pub use jobs::{
    create_storage, JobFilter, JobId, JobQueueStore, Scheduler, SchedulerHandle, WorkerPool,
};
pub use llm::LlmGateway;
pub use matching::MatchEngine;
pub use persistence::{create_persistence, PersistenceGateway};
pub use pipeline::{ResumeJobHandler, ResumeJobProcessor};
pub use router::{UploadFile, UploadRouter};
pub use tracker::TrackerStore;
