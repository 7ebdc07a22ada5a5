//! Cluster Time
//!
//! 클러스터 시간 가십 (`$clusterTime`)

use std::cmp::Ordering;

use bson::{Document, Timestamp};

/// 서버가 알려준 클러스터 논리 시간
///
/// 서명을 포함한 `$clusterTime` 문서 전체를 보관하고, 비교는 타임스탬프로만 합니다.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterTime {
    timestamp: Timestamp,
    document: Document,
}

impl ClusterTime {
    /// `{ clusterTime: Timestamp, signature: {...} }` 문서에서 생성
    pub fn from_document(document: Document) -> Option<Self> {
        let timestamp = document.get_timestamp("clusterTime").ok()?;
        Some(Self {
            timestamp,
            document,
        })
    }

    /// 응답 문서의 `$clusterTime` 필드에서 생성
    pub fn from_reply(reply: &Document) -> Option<Self> {
        let document = reply.get_document("$clusterTime").ok()?;
        Self::from_document(document.clone())
    }

    /// 타임스탬프만으로 생성 (서명 없음)
    pub fn new(timestamp: Timestamp) -> Self {
        let mut document = Document::new();
        document.insert("clusterTime", timestamp);
        Self {
            timestamp,
            document,
        }
    }

    /// 타임스탬프
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// 명령에 첨부할 문서
    pub fn to_document(&self) -> Document {
        self.document.clone()
    }

    /// 두 값 중 더 큰 클러스터 시간
    pub fn max<'a>(a: Option<&'a ClusterTime>, b: Option<&'a ClusterTime>) -> Option<&'a ClusterTime> {
        match (a, b) {
            (Some(a), Some(b)) => Some(if b > a { b } else { a }),
            (a, None) => a,
            (None, b) => b,
        }
    }
}

impl PartialOrd for ClusterTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        let lhs = (self.timestamp.time, self.timestamp.increment);
        let rhs = (other.timestamp.time, other.timestamp.increment);
        Some(lhs.cmp(&rhs))
    }
}
