//! 同步游标（SyncKey）

use crate::im::serialization::deserialize_vec_or_null;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncKeyPair {
    #[serde(rename = "Key")]
    pub key: i64,
    #[serde(rename = "Val")]
    pub val: i64,
}

/// 服务器下发的有序 key/value 列表
///
/// 线上格式为 `{"Count":n,"List":[{"Key":k,"Val":v}]}`，synccheck 使用 `k_v|k_v` 编码
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncCursor {
    #[serde(rename = "Count")]
    count: usize,
    #[serde(rename = "List", deserialize_with = "deserialize_vec_or_null")]
    list: Vec<SyncKeyPair>,
}

impl SyncCursor {
    pub fn new(pairs: Vec<SyncKeyPair>) -> Self {
        Self {
            count: pairs.len(),
            list: pairs,
        }
    }

    pub fn from_pairs(pairs: &[(i64, i64)]) -> Self {
        Self::new(
            pairs
                .iter()
                .map(|&(key, val)| SyncKeyPair { key, val })
                .collect(),
        )
    }

    pub fn pairs(&self) -> &[SyncKeyPair] {
        &self.list
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// `k_v|k_v` 编码
    pub fn encode(&self) -> String {
        self.list
            .iter()
            .map(|p| format!("{}_{}", p.key, p.val))
            .collect::<Vec<_>>()
            .join("|")
    }
}

/// 两个游标：synccheck 用 check，webwxsync 用 data
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncState {
    #[serde(rename = "SyncKey")]
    pub data: SyncCursor,
    #[serde(rename = "SyncCheckKey")]
    pub check: SyncCursor,
}

impl SyncState {
    /// 登录初始化时两个游标相同
    pub fn seeded(cursor: SyncCursor) -> Self {
        Self {
            check: cursor.clone(),
            data: cursor,
        }
    }

    /// 用一次 webwxsync 的返回构造新状态；缺少 SyncCheckKey 时沿用 SyncKey
    pub fn from_response(data: SyncCursor, check: Option<SyncCursor>) -> Self {
        let check = match check {
            Some(c) if !c.is_empty() => c,
            _ => data.clone(),
        };
        Self { data, check }
    }
}
