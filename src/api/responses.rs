use serde::{Deserialize, Serialize};

use crate::group::GroupInfo;
use crate::merkle::hash::field_to_decimal;
use crate::prover::ProofPayload;
use crate::service::{GroupSnapshot, IssuedChallenge, Registration};

#[derive(Debug, Deserialize)]
pub struct ChallengeRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmRequest {
    pub token: String,
    pub email: String,
    pub code: String,
    pub group_id: Option<String>,
    pub commitment: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionRequest {
    pub target_id: String,
    pub group_id: String,
    pub proof: ProofPayload,
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GroupSummary {
    pub id: String,
    pub name: String,
}

impl From<GroupInfo> for GroupSummary {
    fn from(group: GroupInfo) -> Self {
        Self {
            id: group.id,
            name: group.name,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeResponse {
    pub token: String,
    pub expires_at: u64,
    pub eligible_groups: Vec<GroupSummary>,
}

impl From<IssuedChallenge> for ChallengeResponse {
    fn from(issued: IssuedChallenge) -> Self {
        Self {
            token: issued.token,
            expires_at: issued.expires_at,
            eligible_groups: issued.eligible_groups.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmResponse {
    pub verified_email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub already_registered: Option<bool>,
}

impl From<Registration> for ConfirmResponse {
    fn from(registration: Registration) -> Self {
        Self {
            verified_email: registration.verified_email,
            group_id: Some(registration.group_id),
            index: Some(registration.index),
            already_registered: Some(registration.already_registered),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitmentsResponse {
    pub group_id: String,
    pub root: String,
    pub commitments: Vec<String>,
}

impl From<GroupSnapshot> for CommitmentsResponse {
    fn from(snapshot: GroupSnapshot) -> Self {
        Self {
            group_id: snapshot.group_id,
            root: field_to_decimal(&snapshot.root),
            commitments: snapshot.commitments.iter().map(field_to_decimal).collect(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionResponse {
    pub submission_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub tree_depth: usize,
    pub groups: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: String,
}
