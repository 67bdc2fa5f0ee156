use std::{fmt, future::Future, time::Duration};

use futures::{future::BoxFuture, FutureExt};
use lapin::{
    options::{BasicPublishOptions, ExchangeDeclareOptions},
    types::FieldTable,
    BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind,
};
use time::OffsetDateTime;
#[cfg(feature = "tracing")]
use tracing::{debug, instrument};

use super::{AlertData, BrokerConfig, Notify, NotifyError};

/// The publishing side of a broker connection.
pub trait Publish: Send + Sync {
    /// Publish `body` to `exchange` under `routing_key`.
    fn publish<'a>(
        &'a self,
        exchange: &'a str,
        routing_key: &'a str,
        body: Vec<u8>,
    ) -> BoxFuture<'a, Result<(), NotifyError>>;

    /// Whether the connection is still usable.
    fn is_connected(&self) -> bool;

    /// Close the channel and the connection.
    fn close(&self) -> BoxFuture<'_, Result<(), NotifyError>>;
}

/// An AMQP 0.9.1 connection with one channel.
pub struct AmqpConnection {
    connection: Connection,
    channel: Channel,
}

impl AmqpConnection {
    /// Connect and declare `config.exchange` as a durable topic exchange.
    ///
    /// The whole handshake, exchange declaration included, is bounded by
    /// `config.timeout`.
    ///
    /// # Errors
    ///
    /// Fails if the broker is unreachable, does not answer within the
    /// timeout, or refuses the exchange declaration.
    #[cfg_attr(feature = "tracing", instrument(skip_all, fields(exchange = %config.exchange)))]
    pub async fn connect(config: &BrokerConfig) -> Result<Self, NotifyError> {
        #[cfg(feature = "tracing")]
        debug!("connecting");

        let conn = within(config.timeout, Self::open(config)).await??;

        #[cfg(feature = "tracing")]
        debug!("connected");

        Ok(conn)
    }

    async fn open(config: &BrokerConfig) -> Result<Self, NotifyError> {
        let connection = Connection::connect(&config.url, ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;

        channel
            .exchange_declare(
                &config.exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..ExchangeDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await?;

        Ok(Self {
            connection,
            channel,
        })
    }

    async fn send(&self, exchange: &str, routing_key: &str, body: Vec<u8>) -> Result<(), NotifyError> {
        #[allow(clippy::cast_sign_loss)]
        let properties = BasicProperties::default()
            .with_content_type("application/json".into())
            .with_timestamp(OffsetDateTime::now_utc().unix_timestamp() as u64);

        self.channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                &body,
                properties,
            )
            .await?
            // the channel is not in confirm mode, so this resolves once the frame is written
            .await?;

        Ok(())
    }

    async fn shutdown(&self) -> Result<(), NotifyError> {
        self.channel.close(200, "closing").await?;
        self.connection.close(200, "closing").await?;
        Ok(())
    }
}

impl Publish for AmqpConnection {
    fn publish<'a>(
        &'a self,
        exchange: &'a str,
        routing_key: &'a str,
        body: Vec<u8>,
    ) -> BoxFuture<'a, Result<(), NotifyError>> {
        self.send(exchange, routing_key, body).boxed()
    }

    fn is_connected(&self) -> bool {
        self.connection.status().connected()
    }

    fn close(&self) -> BoxFuture<'_, Result<(), NotifyError>> {
        self.shutdown().boxed()
    }
}

impl fmt::Debug for AmqpConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AmqpConnection")
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

async fn within<F: Future>(timeout: Duration, fut: F) -> Result<F::Output, NotifyError> {
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| NotifyError::Timeout(timeout))
}

/// Publishes every alert to a topic exchange.
pub struct Broker {
    config: BrokerConfig,
    conn: Box<dyn Publish>,
}

impl Broker {
    /// Validate `config` and connect.
    ///
    /// # Errors
    ///
    /// Fails when the URL, exchange or routing key is missing, or when the
    /// connection cannot be established.
    pub async fn connect(config: BrokerConfig) -> Result<Self, NotifyError> {
        validate(&config)?;
        let conn = AmqpConnection::connect(&config).await?;
        Ok(Self::with_connection(config, Box::new(conn)))
    }

    /// Use an existing connection.
    #[must_use]
    pub fn with_connection(config: BrokerConfig, conn: Box<dyn Publish>) -> Self {
        Self { config, conn }
    }

    async fn publish(&self, alert: &AlertData) -> Result<(), NotifyError> {
        let body = alert.to_json()?;

        if !self.conn.is_connected() {
            return Err(NotifyError::Disconnected);
        }

        within(
            self.config.timeout,
            self.conn
                .publish(&self.config.exchange, &self.config.routing_key, body),
        )
        .await?
    }
}

fn validate(config: &BrokerConfig) -> Result<(), NotifyError> {
    if config.url.is_empty() {
        return Err(NotifyError::Missing("broker URL"));
    }
    if config.exchange.is_empty() {
        return Err(NotifyError::Missing("broker exchange"));
    }
    if config.routing_key.is_empty() {
        return Err(NotifyError::Missing("broker routing key"));
    }
    Ok(())
}

impl Notify for Broker {
    fn name(&self) -> &'static str {
        "broker"
    }

    fn notify<'a>(&'a self, alert: &'a AlertData) -> BoxFuture<'a, Result<(), NotifyError>> {
        self.publish(alert).boxed()
    }

    fn close(&self) -> BoxFuture<'_, Result<(), NotifyError>> {
        self.conn.close()
    }
}

impl fmt::Debug for Broker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Broker")
            .field("exchange", &self.config.exchange)
            .field("routing_key", &self.config.routing_key)
            .finish_non_exhaustive()
    }
}
