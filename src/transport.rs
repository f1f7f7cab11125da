use std::io::Read;
use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};

use crate::config::{ResolvedConfig, RetryPolicy};
use crate::error::KiraError;

pub type ByteStream = Box<dyn Read + Send>;

pub trait Transport: Send + Sync {
    fn fetch(
        &self,
        url: &str,
        query: &[(&str, &str)],
        headers: &[(&str, &str)],
    ) -> Result<ByteStream, KiraError>;

    fn fetch_text(&self, url: &str, query: &[(&str, &str)]) -> Result<String, KiraError> {
        let mut stream = self.fetch(url, query, &[])?;
        let mut text = String::new();
        stream.read_to_string(&mut text).map_err(|err| {
            KiraError::TransportExhausted {
                url: url.to_string(),
                attempts: 1,
                cause: err.to_string(),
            }
        })?;
        Ok(text)
    }
}

impl<T: Transport + ?Sized> Transport for &T {
    fn fetch(
        &self,
        url: &str,
        query: &[(&str, &str)],
        headers: &[(&str, &str)],
    ) -> Result<ByteStream, KiraError> {
        (**self).fetch(url, query, headers)
    }
}

#[derive(Debug)]
pub enum Attempt<T> {
    Success(T),
    Retry { cause: String },
    Fatal(KiraError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    Retryable,
    Terminal,
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: usize) -> Duration {
        self.base_delay * attempt as u32
    }

    pub fn classify_status(status: u16) -> StatusClass {
        match status {
            200..=299 => StatusClass::Success,
            429 | 500 | 502 | 503 | 504 => StatusClass::Retryable,
            _ => StatusClass::Terminal,
        }
    }

    pub fn run<T, F, S>(&self, url: &str, mut attempt: F, mut sleep: S) -> Result<T, KiraError>
    where
        F: FnMut(usize) -> Attempt<T>,
        S: FnMut(Duration),
    {
        let mut last_cause = String::from("no attempt made");
        for number in 1..=self.max_attempts {
            match attempt(number) {
                Attempt::Success(value) => return Ok(value),
                Attempt::Fatal(err) => return Err(err),
                Attempt::Retry { cause } => {
                    last_cause = cause;
                    if number < self.max_attempts {
                        let delay = self.delay_for(number);
                        tracing::debug!(
                            url,
                            attempt = number,
                            max_attempts = self.max_attempts,
                            delay_ms = delay.as_millis() as u64,
                            cause = %last_cause,
                            "retrying request"
                        );
                        sleep(delay);
                    }
                }
            }
        }
        Err(KiraError::TransportExhausted {
            url: url.to_string(),
            attempts: self.max_attempts,
            cause: last_cause,
        })
    }
}

#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    retry: RetryPolicy,
}

impl HttpTransport {
    pub fn new(config: &ResolvedConfig) -> Result<Self, KiraError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent)
                .map_err(|err| KiraError::MetadataInvalid(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|err| KiraError::TransportExhausted {
                url: config.catalog_url.clone(),
                attempts: 0,
                cause: err.to_string(),
            })?;
        Ok(Self {
            client,
            retry: config.retry,
        })
    }

    fn attempt(
        &self,
        url: &str,
        query: &[(&str, &str)],
        headers: &[(&str, &str)],
    ) -> Attempt<reqwest::blocking::Response> {
        let mut request = self.client.get(url).query(query);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        match request.send() {
            Ok(resp) => {
                let status = resp.status().as_u16();
                match RetryPolicy::classify_status(status) {
                    StatusClass::Success => Attempt::Success(resp),
                    StatusClass::Retryable => {
                        drop(resp);
                        Attempt::Retry {
                            cause: format!("HTTP {status}"),
                        }
                    }
                    StatusClass::Terminal => {
                        let message = resp
                            .text()
                            .map(|text| text.trim().chars().take(200).collect::<String>())
                            .unwrap_or_else(|_| "request failed".to_string());
                        Attempt::Fatal(KiraError::HttpStatus {
                            url: url.to_string(),
                            status,
                            message,
                        })
                    }
                }
            }
            Err(err) if is_retryable_error(&err) => Attempt::Retry {
                cause: err.to_string(),
            },
            Err(err) => Attempt::Fatal(KiraError::TransportExhausted {
                url: url.to_string(),
                attempts: 1,
                cause: err.to_string(),
            }),
        }
    }
}

impl Transport for HttpTransport {
    fn fetch(
        &self,
        url: &str,
        query: &[(&str, &str)],
        headers: &[(&str, &str)],
    ) -> Result<ByteStream, KiraError> {
        let response = self.retry.run(
            url,
            |_| self.attempt(url, query, headers),
            thread::sleep,
        )?;
        Ok(Box::new(response))
    }
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
