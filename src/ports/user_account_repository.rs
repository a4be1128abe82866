//! UserAccountRepository port - the account fields this service reads.

use async_trait::async_trait;

use crate::domain::foundation::{DomainError, UserId};
use crate::domain::subscription::UserAccount;

#[async_trait]
pub trait UserAccountRepository: Send + Sync {
    async fn find_by_id(&self, user_id: &UserId) -> Result<Option<UserAccount>, DomainError>;

    /// Stores the gateway customer created for this user.
    async fn set_gateway_customer_id(
        &self,
        user_id: &UserId,
        customer_id: &str,
    ) -> Result<(), DomainError>;
}
