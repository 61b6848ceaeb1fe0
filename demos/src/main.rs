use std::sync::Arc;

use letterbox::jobs::{JobRegistry, MemoryQueue, Worker};
use letterbox::mail::{
    DeliverLaterOptions, HasMailers, MailDeliveryJob, MemoryTemplates, Message, Settings,
};
use letterbox::{DeliveryConfig, EnvConfig, MailOptions, MailerClass, Mailers};
use serde::Deserialize;
use serde_json::{json, Map, Value};

#[derive(Debug, Deserialize)]
struct Config {
    /// Where the `file` delivery method writes messages.
    #[serde(default = "default_mail_dir")]
    mail_dir: String,
}

fn default_mail_dir() -> String {
    "tmp/mails".to_string()
}

#[derive(Clone)]
struct AppState {
    mailers: Mailers,
}

impl HasMailers for AppState {
    fn mailers(&self) -> &Mailers {
        &self.mailers
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env_with_prefix("DEMO")?;
    let app = application_mailer(&config);
    let users = user_mailer(&app);

    let mailers = Mailers::new();
    mailers.register(&app).register(&users);

    // Composed and sent in place
    let mut params = Map::new();
    params.insert("name".into(), json!("Ada"));
    let outcome = users
        .with(params)
        .deliver("welcome", vec![json!("ada@example.com")])?
        .deliver_now()
        .await?;
    tracing::info!(?outcome, "delivered in place");

    // Queued, then replayed by a worker
    let queue = MemoryQueue::new();
    let job_id = users
        .deliver("welcome", vec![json!("grace@example.com")])?
        .deliver_later(&queue, DeliverLaterOptions::new())
        .await?;
    tracing::info!(%job_id, "delivery queued");

    let registry = JobRegistry::new().register::<MailDeliveryJob<AppState>>();
    let worker = Worker::new(queue, registry, AppState { mailers }).queues(["mailers"]);
    let processed = worker.work_off().await?;

    tracing::info!(processed, mail_dir = %config.mail_dir, "done");
    Ok(())
}

fn application_mailer(config: &Config) -> Arc<MailerClass> {
    let mailer = MailerClass::new("ApplicationMailer");
    mailer.default("from", "Letterbox <hello@example.com>");

    let mut file = Settings::new();
    file.insert("location".into(), json!(config.mail_dir));
    mailer.set_delivery_settings("file", file);
    mailer.configure(&DeliveryConfig {
        delivery_method: "file".to_string(),
        ..DeliveryConfig::default()
    });

    mailer.register_observer(Arc::new(|message: &Message| {
        tracing::info!(to = ?message.to(), subject = ?message.subject(), "observed delivery");
    }));
    mailer
}

fn user_mailer(app: &Arc<MailerClass>) -> Arc<MailerClass> {
    let users = MailerClass::inherit("UserMailer", app);
    users.set_template_renderer(
        MemoryTemplates::new()
            .add("user_mailer", "welcome", "text", |ctx| {
                format!("Welcome, {}!\n\nThe terms are attached.", ctx.get("name").unwrap_or_default())
            })
            .add("user_mailer", "welcome", "html", |ctx| {
                format!(
                    "<h1>Welcome, {}!</h1><p>The terms are attached.</p>",
                    ctx.get("name").unwrap_or_default()
                )
            }),
    );

    users.action("welcome", |m, args| {
        let email = args.first().and_then(Value::as_str).unwrap_or_default().to_string();
        let name = m
            .param("name")
            .and_then(Value::as_str)
            .unwrap_or("there")
            .to_string();
        m.assign("name", name);
        m.attachments_mut()
            .add("terms.txt", "Be excellent to each other.\n")?;
        m.mail(MailOptions::new().to(email))?;
        Ok(())
    });
    users
}
