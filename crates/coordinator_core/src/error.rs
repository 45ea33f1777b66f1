use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Db(#[from] coordinator_db::DbError),

    #[error(transparent)]
    Transport(#[from] coordinator_transport::TransportError),
}
