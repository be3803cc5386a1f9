use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::PgWireResult;

/// Shared server password for pgwire cleartext authentication. Any user name
/// is accepted; the database name selects the tenant.
#[derive(Debug)]
pub struct VacancyAuthSource {
    password: Vec<u8>,
}

impl VacancyAuthSource {
    pub fn new(password: String) -> Self {
        Self {
            password: password.into_bytes(),
        }
    }
}

#[async_trait]
impl AuthSource for VacancyAuthSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        tracing::debug!("password lookup for {login:?}");
        Ok(Password::new(None, self.password.clone()))
    }
}
