use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum BackendError {
    #[snafu(display("API key not configured"))]
    MissingApiKey { stage: &'static str },
    #[snafu(display("failed to load backend configuration on `{stage}`, {source}"))]
    Config {
        stage: &'static str,
        #[snafu(source(from(figment::Error, Box::new)))]
        source: Box<figment::Error>,
    },
    #[snafu(display("request failed on `{stage}`, {source}"))]
    Request {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("backend returned status {status}: {body}"))]
    Status {
        stage: &'static str,
        status: u16,
        body: String,
    },
    #[snafu(display("response stream failed on `{stage}`, {source}"))]
    Stream {
        stage: &'static str,
        source: reqwest::Error,
    },
}

pub type BackendResult<T> = Result<T, BackendError>;
