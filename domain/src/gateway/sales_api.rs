use crate::error::{Error, ExternalErrorKind};
use crate::gateway::http::{ApiClientBuilder, ApiClients};
use crate::period::Period;
use async_trait::async_trait;
use events::DataType;
use log::*;
use serde_json::Value;
use service::config::Config;

const PRODUCTS_PATH: &str = "/products";
const SALES_BY_MONTH_PATH: &str = "/sales/by-month";
const PRET_FAMILLES_PATH: &str = "/pretfamilles";
const PRET_PRODUITS_PATH: &str = "/pretproduits";
const DEPENSE_MOUVEMENTS_PATH: &str = "/depenses/mouvements";
const FORCE_SYNC_PATH: &str = "/sync/force-sync";

/// The backend REST endpoints the realtime layer pulls from when the event
/// stream cannot be relied on.
#[async_trait]
pub trait SalesApi: Send + Sync {
    async fn products(&self) -> Result<Vec<Value>, Error>;

    async fn sales_by_month(&self, period: Period) -> Result<Vec<Value>, Error>;

    async fn pret_familles(&self) -> Result<Vec<Value>, Error>;

    async fn pret_produits(&self) -> Result<Vec<Value>, Error>;

    /// Expense movements of the current month.
    async fn depense_mouvements(&self) -> Result<Vec<Value>, Error>;

    /// Ask the backend to push a `force-sync` event to every connected client.
    async fn request_force_sync(&self) -> Result<(), Error>;

    /// The list backing `data_type`. Only sales are scoped to `period`.
    async fn fetch(&self, data_type: DataType, period: Period) -> Result<Vec<Value>, Error> {
        match data_type {
            DataType::Products => self.products().await,
            DataType::Sales => self.sales_by_month(period).await,
            DataType::PretFamilles => self.pret_familles().await,
            DataType::PretProduits => self.pret_produits().await,
            DataType::DepenseDuMois => self.depense_mouvements().await,
        }
    }
}

/// `SalesApi` over HTTP.
pub struct HttpSalesApi {
    clients: ApiClients,
    api_root: String,
}

impl HttpSalesApi {
    /// `api_root` is the base URL including the API prefix, e.g.
    /// `http://localhost:3000/api`.
    pub fn new(clients: ApiClients, api_root: impl Into<String>) -> Self {
        Self {
            clients,
            api_root: api_root.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, Error> {
        let clients = ApiClientBuilder::new()
            .with_timeout(config.http_timeout())
            .with_max_retries(config.http_max_retries)
            .with_token(config.api_token())
            .build()?;
        Ok(Self::new(clients, config.api_root()))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.api_root)
    }

    async fn get_list(&self, path: &str, query: &[(&str, String)]) -> Result<Vec<Value>, Error> {
        let url = self.url(path);
        debug!("GET {url}");

        let response = self.clients.reads.get(&url).query(query).send().await?;
        let status = response.status();
        if !status.is_success() {
            warn!("GET {url} returned {status}");
            return Err(Error::external(
                ExternalErrorKind::Status(status.as_u16()),
                &format!("GET {path} returned {status}"),
            ));
        }

        let body: Value = response.json().await?;
        into_list(body).map_err(|err| {
            warn!("GET {url} returned an unexpected body: {err}");
            err
        })
    }
}

/// Accepts a bare array or an array wrapped as `{ "data": [...] }`.
fn into_list(body: Value) -> Result<Vec<Value>, Error> {
    match body {
        Value::Array(items) => Ok(items),
        Value::Object(mut fields) => match fields.remove("data") {
            Some(Value::Array(items)) => Ok(items),
            _ => Err(Error::external(
                ExternalErrorKind::InvalidResponse,
                "expected a JSON array or an object with a data array",
            )),
        },
        other => Err(Error::external(
            ExternalErrorKind::InvalidResponse,
            &format!("expected a JSON array, got {other}"),
        )),
    }
}

#[async_trait]
impl SalesApi for HttpSalesApi {
    async fn products(&self) -> Result<Vec<Value>, Error> {
        self.get_list(PRODUCTS_PATH, &[]).await
    }

    async fn sales_by_month(&self, period: Period) -> Result<Vec<Value>, Error> {
        self.get_list(
            SALES_BY_MONTH_PATH,
            &[
                ("month", period.month().to_string()),
                ("year", period.year().to_string()),
            ],
        )
        .await
    }

    async fn pret_familles(&self) -> Result<Vec<Value>, Error> {
        self.get_list(PRET_FAMILLES_PATH, &[]).await
    }

    async fn pret_produits(&self) -> Result<Vec<Value>, Error> {
        self.get_list(PRET_PRODUITS_PATH, &[]).await
    }

    async fn depense_mouvements(&self) -> Result<Vec<Value>, Error> {
        self.get_list(DEPENSE_MOUVEMENTS_PATH, &[]).await
    }

    async fn request_force_sync(&self) -> Result<(), Error> {
        let url = self.url(FORCE_SYNC_PATH);
        debug!("POST {url}");

        let response = self.clients.writes.post(&url).send().await?;
        let status = response.status();
        if status.is_success() {
            info!("Force sync requested");
            Ok(())
        } else {
            warn!("POST {url} returned {status}");
            Err(Error::external(
                ExternalErrorKind::Status(status.as_u16()),
                &format!("POST {FORCE_SYNC_PATH} returned {status}"),
            ))
        }
    }
}
