// The `google_auth` module authorizes access to the Gmail API.

use google_gmail1::{
    Gmail,
    api::Scope,
    yup_oauth2::{
        InstalledFlowAuthenticator, InstalledFlowReturnMethod,
        authenticator_delegate::InstalledFlowDelegate,
    },
};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::{
    client::legacy::Client, client::legacy::connect::HttpConnector, rt::TokioExecutor,
};
use rustls::crypto::{CryptoProvider, ring::default_provider};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

/// A type alias for the HTTPS connector.
pub type HttpsConnectorType = HttpsConnector<HttpConnector>;
/// A type alias for the Gmail hub.
pub type GmailHubType = Gmail<HttpsConnectorType>;

/// The `AuthError` enum defines the possible errors that can occur during authentication.
#[derive(Error, Debug)]
pub enum AuthError {
    /// The OAuth client secret file is missing or unreadable.
    #[error("cannot read OAuth client secret {path}: {source}")]
    MissingCredentials {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The installed-flow authenticator could not be set up.
    #[error("failed to build the authenticator: {0}")]
    Authenticator(String),
    /// No access token could be obtained for the requested scopes.
    #[error("failed to obtain an access token: {0}")]
    Token(String),
    /// The TLS connector could not load the platform roots.
    #[error("failed to set up TLS: {0}")]
    Tls(String),
}

/// The `GConf` struct holds the configuration for Google authentication.
#[derive(Clone, Debug)]
pub struct GConf(Arc<InnerConf>);

/// The inner configuration for `GConf`.
#[derive(Clone, Debug)]
pub struct InnerConf {
    /// The path to the OAuth client secret (`credential.json`).
    pub credentials_path: PathBuf,
    /// Where refreshed tokens are persisted (`token.json`).
    pub token_path: PathBuf,
}

impl GConf {
    /// Creates a new `GConf`.
    pub fn new(credentials_path: PathBuf, token_path: PathBuf) -> GConf {
        GConf(Arc::new(InnerConf {
            credentials_path,
            token_path,
        }))
    }

    pub fn credentials_path(&self) -> &Path {
        &self.0.credentials_path
    }

    pub fn token_path(&self) -> &Path {
        &self.0.token_path
    }
}

/// Opens the consent page in the user's browser, printing the URL when no
/// browser is available.
struct BrowserFlowDelegate;

impl InstalledFlowDelegate for BrowserFlowDelegate {
    fn present_user_url<'a>(
        &'a self,
        url: &'a str,
        need_code: bool,
    ) -> Pin<Box<dyn Future<Output = Result<String, String>> + Send + 'a>> {
        Box::pin(async move {
            if let Err(e) = webbrowser::open(url) {
                warn!(error = %e, "Could not open a browser");
            }
            info!(url = %url, "Authorize chatterbox by visiting this URL");
            if !need_code {
                return Ok(String::new());
            }

            let mut code = String::new();
            BufReader::new(tokio::io::stdin())
                .read_line(&mut code)
                .await
                .map_err(|e| e.to_string())?;
            Ok(code.trim().to_string())
        })
    }
}

/// Authenticates with the Gmail API and returns a `GmailHubType`.
pub async fn gmail_auth(conf: GConf, scopes: &[Scope]) -> Result<GmailHubType, AuthError> {
    info!(scopes = ?scopes, "Authenticating with Gmail API");

    let secret = google_gmail1::yup_oauth2::read_application_secret(conf.credentials_path())
        .await
        .map_err(|source| AuthError::MissingCredentials {
            path: conf.credentials_path().to_path_buf(),
            source,
        })?;

    let auth = InstalledFlowAuthenticator::builder(secret, InstalledFlowReturnMethod::HTTPRedirect)
        .persist_tokens_to_disk(conf.token_path())
        .flow_delegate(Box::new(BrowserFlowDelegate))
        .build()
        .await
        .map_err(|e| AuthError::Authenticator(e.to_string()))?;

    // Request a token up front so consent happens before the first poll.
    auth.token(scopes)
        .await
        .map_err(|e| AuthError::Token(e.to_string()))?;

    _ = CryptoProvider::install_default(default_provider());

    let https = HttpsConnectorBuilder::new()
        .with_native_roots()
        .map_err(|e| AuthError::Tls(e.to_string()))?
        .https_or_http()
        .enable_http1()
        .build();

    let client = Client::builder(TokioExecutor::new()).build(https);

    let hub = Gmail::new(client, auth);
    info!("Successfully authenticated with Gmail API");
    Ok(hub)
}
