use std::time::Duration;

use async_trait::async_trait;
use dynomite::{
    dynamodb::{
        DeleteItemError, DeleteItemInput, DynamoDb, DynamoDbClient, GetItemInput, PutItemError,
        PutItemInput,
    },
    Attribute, Attributes, FromAttributes,
};
use rusoto_core::RusotoError;

use super::{CasOutcome, LeaseStore, RenewCas};
use crate::{
    error::LeaseError,
    lease::{HolderIdentity, Lease, ResourceKey},
    util::now_ms,
};

/// Durable lease store over a DynamoDB table.
///
/// Each mutation reads the row with a consistent get, decides locally, then
/// writes behind a condition expression asserting the row still looks the way
/// it did when read. A `ConditionalCheckFailed` is a lost race, never an
/// error: the loser re-reads and reports whoever won. Rows are stamped with
/// this adapter's wall clock at write time; racing writers still serialize on
/// the conditional write, so clock skew between adapters only bounds lease
/// precision, not correctness.
pub struct DynamoLeaseStore {
    client: DynamoDbClient,
    table_name: String,
}

impl DynamoLeaseStore {
    pub fn new(client: DynamoDbClient, table_name: impl Into<String>) -> Self {
        Self {
            client,
            table_name: table_name.into(),
        }
    }

    async fn read_row(&self, key: &ResourceKey) -> Result<Option<Lease>, LeaseError> {
        let input = GetItemInput {
            consistent_read: Some(true),
            key: key_attrs(key),
            table_name: self.table_name.clone(),
            ..Default::default()
        };
        let output = self
            .client
            .get_item(input)
            .await
            .map_err(dispatch_error)?;
        match output.item {
            Some(attrs) => Ok(Some(Lease::from_attrs(attrs).map_err(|err| {
                LeaseError::Fatal(format!("malformed lease row: {:?}", err))
            })?)),
            None => Ok(None),
        }
    }

    /// Writes `lease` only if the row still matches `prior` (or is still
    /// absent). Returns false when the condition lost a race.
    async fn conditional_put(
        &self,
        lease: &Lease,
        prior: Option<&Lease>,
    ) -> Result<bool, LeaseError> {
        let (condition, values) = match prior {
            None => ("attribute_not_exists(lease_key)".to_string(), None),
            Some(row) => {
                let mut values = Attributes::new();
                values.insert(":prior_holder".to_string(), row.holder_id.clone().into_attr());
                values.insert(":prior_renewed".to_string(), row.last_renewed_at.into_attr());
                (
                    "holder_id = :prior_holder AND last_renewed_at = :prior_renewed".to_string(),
                    Some(values),
                )
            }
        };
        let input = PutItemInput {
            condition_expression: Some(condition),
            expression_attribute_values: values,
            item: lease.clone().into(),
            table_name: self.table_name.clone(),
            ..Default::default()
        };
        match self.client.put_item(input).await {
            Ok(_) => Ok(true),
            Err(RusotoError::Service(PutItemError::ConditionalCheckFailed(_))) => Ok(false),
            Err(err) => Err(dispatch_error(err)),
        }
    }
}

#[async_trait]
impl LeaseStore for DynamoLeaseStore {
    async fn try_acquire_or_renew(
        &self,
        key: &ResourceKey,
        holder: &HolderIdentity,
        duration: Duration,
    ) -> Result<CasOutcome, LeaseError> {
        let now = now_ms();
        let prior = self.read_row(key).await?;

        if let Some(row) = &prior {
            if row.is_active(now) && row.holder_id != holder.holder_id {
                return Ok(CasOutcome::Held(row.clone()));
            }
        }

        let acquired_at = prior
            .as_ref()
            .filter(|row| row.is_active(now))
            .map(|row| row.acquired_at)
            .unwrap_or(now);
        let lease = Lease {
            lease_key: key.partition_key(),
            holder_id: holder.holder_id.clone(),
            holder_name: holder.holder_name.clone(),
            acquired_at,
            last_renewed_at: now,
            expires_at: now + duration.as_millis() as u64,
        };

        if self.conditional_put(&lease, prior.as_ref()).await? {
            return Ok(CasOutcome::Granted(lease));
        }

        // Lost the race; report whoever won, or hand the decision back to
        // the retry layer if the row is already reclaimable again.
        match self.read_row(key).await? {
            Some(row) if row.is_active(now_ms()) && row.holder_id != holder.holder_id => {
                Ok(CasOutcome::Held(row))
            }
            _ => Err(LeaseError::Unavailable(
                "lease row changed mid-acquire".to_string(),
            )),
        }
    }

    async fn try_renew(
        &self,
        key: &ResourceKey,
        holder_id: &str,
        duration: Duration,
    ) -> Result<RenewCas, LeaseError> {
        let now = now_ms();
        let prior = match self.read_row(key).await? {
            None => return Ok(RenewCas::Lapsed),
            Some(row) if !row.is_active(now) => return Ok(RenewCas::Lapsed),
            Some(row) if row.holder_id != holder_id => return Ok(RenewCas::HeldByOther(row)),
            Some(row) => row,
        };

        let lease = Lease {
            last_renewed_at: now,
            expires_at: now + duration.as_millis() as u64,
            ..prior.clone()
        };
        if self.conditional_put(&lease, Some(&prior)).await? {
            return Ok(RenewCas::Renewed(lease));
        }

        // Somebody moved the row between read and write. Whatever it says
        // now decides whether the caller still owns anything.
        match self.read_row(key).await? {
            Some(row) if row.is_active(now_ms()) && row.holder_id == holder_id => {
                Ok(RenewCas::Renewed(row))
            }
            Some(row) if row.is_active(now_ms()) => Ok(RenewCas::HeldByOther(row)),
            _ => Ok(RenewCas::Lapsed),
        }
    }

    async fn release(&self, key: &ResourceKey, holder_id: &str) -> Result<bool, LeaseError> {
        let now = now_ms();
        let prior = match self.read_row(key).await? {
            Some(row) if row.is_active(now) && row.holder_id == holder_id => row,
            _ => return Ok(false),
        };

        let mut values = Attributes::new();
        values.insert(":prior_holder".to_string(), prior.holder_id.into_attr());
        values.insert(":prior_renewed".to_string(), prior.last_renewed_at.into_attr());
        let input = DeleteItemInput {
            condition_expression: Some(
                "holder_id = :prior_holder AND last_renewed_at = :prior_renewed".to_string(),
            ),
            expression_attribute_values: Some(values),
            key: key_attrs(key),
            table_name: self.table_name.clone(),
            ..Default::default()
        };
        match self.client.delete_item(input).await {
            Ok(_) => Ok(true),
            Err(RusotoError::Service(DeleteItemError::ConditionalCheckFailed(_))) => Ok(false),
            Err(err) => Err(dispatch_error(err)),
        }
    }

    async fn get(&self, key: &ResourceKey) -> Result<Option<Lease>, LeaseError> {
        self.read_row(key).await
    }
}

fn key_attrs(key: &ResourceKey) -> Attributes {
    let mut attrs = Attributes::new();
    attrs.insert("lease_key".to_string(), key.partition_key().into_attr());
    attrs
}

fn dispatch_error<E: std::fmt::Debug>(err: RusotoError<E>) -> LeaseError {
    match err {
        RusotoError::HttpDispatch(err) => LeaseError::Unavailable(err.to_string()),
        RusotoError::Unknown(response) if response.status.is_server_error() => {
            LeaseError::Unavailable(format!("dynamodb returned {}", response.status))
        }
        other => LeaseError::Fatal(format!("{:?}", other)),
    }
}
