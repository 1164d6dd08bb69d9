//! memoir-core
//!
//! Scheduled "time capsule" email delivery with exactly-once semantics.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, capsule, claim, status, outcome, errors）
//! - **ports**: 抽象化レイヤー（CapsuleStore, Notifier, Clock, IdGenerator）
//! - **impls**: ports の実装（SQLite / in-memory store, SMTP / log / recording notifier）
//! - **app**: アプリケーションロジック（builder, capsules, scanner, coordinator, scheduler_loop, status）
//! - **config**: 設定（TOML + `.env` + `MEMOIR_*`）

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;
