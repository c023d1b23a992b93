use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::PgWireResult;

/// Single shared password for every client. The startup handler compares
/// what the client sends against the password returned here.
#[derive(Debug)]
pub struct RoomholdAuthSource {
    password: String,
}

impl RoomholdAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for RoomholdAuthSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        tracing::debug!(?login, "password login");
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}
