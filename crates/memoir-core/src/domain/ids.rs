//! Typed identifiers for capsules, owners and claim tokens.
//!
//! # ULID ベースの ID + ジェネリック実装
//! すべての ID は ULID (Universally Unique Lexicographically Sortable Identifier) です。
//! Phantom type パターンで `CapsuleId` / `OwnerId` / `ClaimToken` を区別します。
//!
//! ## ULID の特性
//! - **時刻でソート可能**: 作成順に並ぶ（capsule 一覧の並び替えに使える）
//! - **分散生成可能**: 複数プロセスが同じ store を共有しても衝突しない
//! - **文字列表現が固定長**: SQLite の TEXT カラムにそのまま保存できる

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use ulid::Ulid;

/// ID の種類ごとのマーカー（Display / FromStr のプレフィックスを決める）
///
/// Display で使うプレフィックス（"capsule-", "owner-", "claim-"）を提供します。
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// ULID を包む ID。`T` で種類を区別するので、`OwnerId` を `CapsuleId` の
/// 引数に渡すとコンパイルエラーになります。
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    /// Fresh random id stamped with the current system time.
    pub fn generate() -> Self {
        Self::from_ulid(Ulid::new())
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }

    /// Bare ULID text without the display prefix (storage form).
    pub fn to_storage(&self) -> String {
        self.ulid.to_string()
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

/// Error returned when an id string is neither `<prefix><ulid>` nor a bare ULID.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid id `{input}`")]
pub struct ParseIdError {
    input: String,
}

/// プレフィックス付き（Display 形式）とプレフィックスなし（storage 形式）の両方を受け付ける
impl<T: IdMarker> FromStr for Id<T> {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix(T::prefix()).unwrap_or(s);
        Ulid::from_string(raw)
            .map(Self::from_ulid)
            .map_err(|_| ParseIdError {
                input: s.to_string(),
            })
    }
}

// JSON では Display 形式（"capsule-01H..."）の文字列
impl<T: IdMarker> Serialize for Id<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de, T: IdMarker> Deserialize<'de> for Id<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// ========================================
// マーカー型の定義
// ========================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Capsule {}

impl IdMarker for Capsule {
    fn prefix() -> &'static str {
        "capsule-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Owner {}

impl IdMarker for Owner {
    fn prefix() -> &'static str {
        "owner-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ClaimMarker {}

impl IdMarker for ClaimMarker {
    fn prefix() -> &'static str {
        "claim-"
    }
}

/// Identifier of a Capsule (immutable for its whole life).
pub type CapsuleId = Id<Capsule>;

/// Reference to the authoring user. Issued by the authentication layer.
pub type OwnerId = Id<Owner>;

/// Token identifying one claim on one capsule. Commit and release must present it.
pub type ClaimToken = Id<ClaimMarker>;
