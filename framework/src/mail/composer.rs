//! A mailer instance: the state one action works on while composing.

use std::sync::Arc;

use serde_json::{Map, Value};

use super::assembler::{assemble, Assembly};
use super::attachments::Attachments;
use super::collector::{
    collect_from_block, collect_from_body, collect_from_templates, FormatCollector, TemplateLookup,
};
use super::defaults::humanize;
use super::delivery::{DeliveryMethodChoice, Settings};
use super::headers::{key, HeaderMap, HeaderValue};
use super::template::RenderContext;
use super::{MailError, MailerClass, Message};

/// Named parameters passed with [`MailerClass::with`].
pub type Params = Map<String, Value>;

/// Keys that configure composition instead of becoming header fields.
const SPECIAL_KEYS: [&str; 9] = [
    "content_type",
    "charset",
    "parts_order",
    "mime_version",
    "body",
    "template_path",
    "template_name",
    "delivery_method",
    "delivery_method_options",
];

/// Call-site options for [`Composer::mail`].
///
/// ```ignore
/// m.mail(
///     MailOptions::new()
///         .to("ada@example.com")
///         .subject("Your invoice")
///         .header("X-Campaign", "billing"),
/// )?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct MailOptions {
    headers: HeaderMap,
    content_type: Option<String>,
    charset: Option<String>,
    parts_order: Option<Vec<String>>,
    mime_version: Option<String>,
    body: Option<String>,
    template_path: Option<String>,
    template_name: Option<String>,
    delivery_method: Option<DeliveryMethodChoice>,
    delivery_method_options: Option<MethodOptions>,
}

/// Delivery method settings as given: typed, or JSON text from a header-style
/// call or a class default.
#[derive(Debug, Clone)]
enum MethodOptions {
    Settings(Settings),
    Json(String),
}

impl MethodOptions {
    fn into_settings(self) -> Result<Settings, MailError> {
        match self {
            MethodOptions::Settings(settings) => Ok(settings),
            MethodOptions::Json(text) => match serde_json::from_str(&text) {
                Ok(Value::Object(settings)) => Ok(settings),
                _ => Err(MailError::InvalidSettings {
                    method: "delivery_method_options".into(),
                    reason: format!("expected a JSON object, got {text:?}"),
                }),
            },
        }
    }
}

impl MailOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn to(self, to: impl Into<HeaderValue>) -> Self {
        self.header("To", to)
    }

    pub fn from(self, from: impl Into<HeaderValue>) -> Self {
        self.header("From", from)
    }

    pub fn cc(self, cc: impl Into<HeaderValue>) -> Self {
        self.header("Cc", cc)
    }

    pub fn bcc(self, bcc: impl Into<HeaderValue>) -> Self {
        self.header("Bcc", bcc)
    }

    pub fn reply_to(self, reply_to: impl Into<HeaderValue>) -> Self {
        self.header("Reply-To", reply_to)
    }

    pub fn subject(self, subject: impl Into<String>) -> Self {
        self.header("Subject", subject.into())
    }

    /// Any header field. Special keys are routed to their typed option.
    pub fn header(mut self, name: &str, value: impl Into<HeaderValue>) -> Self {
        let value = value.into();
        match key(name).as_str() {
            "content_type" => self.content_type = Some(value.joined()),
            "charset" => self.charset = Some(value.joined()),
            "parts_order" => self.parts_order = Some(value.to_list()),
            "mime_version" => self.mime_version = Some(value.joined()),
            "body" => self.body = Some(value.joined()),
            "template_path" => self.template_path = Some(value.joined()),
            "template_name" => self.template_name = Some(value.joined()),
            "delivery_method" => self.delivery_method = Some(value.joined().into()),
            "delivery_method_options" => {
                self.delivery_method_options = Some(MethodOptions::Json(value.joined()))
            }
            _ => self.headers.insert(name, value),
        }
        self
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn charset(mut self, charset: impl Into<String>) -> Self {
        self.charset = Some(charset.into());
        self
    }

    pub fn parts_order<S: Into<String>>(mut self, order: impl IntoIterator<Item = S>) -> Self {
        self.parts_order = Some(order.into_iter().map(Into::into).collect());
        self
    }

    pub fn mime_version(mut self, version: impl Into<String>) -> Self {
        self.mime_version = Some(version.into());
        self
    }

    /// Use this body instead of rendering templates.
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn template_path(mut self, path: impl Into<String>) -> Self {
        self.template_path = Some(path.into());
        self
    }

    pub fn template_name(mut self, name: impl Into<String>) -> Self {
        self.template_name = Some(name.into());
        self
    }

    pub fn delivery_method(mut self, method: impl Into<DeliveryMethodChoice>) -> Self {
        self.delivery_method = Some(method.into());
        self
    }

    /// Settings merged over the delivery method's defaults for this message.
    pub fn delivery_method_options(mut self, settings: Settings) -> Self {
        self.delivery_method_options = Some(MethodOptions::Settings(settings));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
            && self.content_type.is_none()
            && self.charset.is_none()
            && self.parts_order.is_none()
            && self.mime_version.is_none()
            && self.body.is_none()
            && self.template_path.is_none()
            && self.template_name.is_none()
            && self.delivery_method.is_none()
            && self.delivery_method_options.is_none()
    }
}

/// The instance an action runs against.
pub struct Composer {
    class: Arc<MailerClass>,
    action_name: String,
    params: Params,
    assigns: Map<String, Value>,
    attachments: Attachments,
    message: Message,
    mail_was_called: bool,
}

impl Composer {
    pub(crate) fn new(class: Arc<MailerClass>, action: impl Into<String>, params: Params) -> Self {
        Self {
            class,
            action_name: action.into(),
            params,
            assigns: Map::new(),
            attachments: Attachments::default(),
            message: Message::new(),
            mail_was_called: false,
        }
    }

    pub fn class(&self) -> &Arc<MailerClass> {
        &self.class
    }

    pub fn action_name(&self) -> &str {
        &self.action_name
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn param(&self, name: &str) -> Option<&Value> {
        self.params.get(name)
    }

    /// Expose a value to templates.
    pub fn assign(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.assigns.insert(name.into(), value.into());
    }

    pub fn assigns(&self) -> &Map<String, Value> {
        &self.assigns
    }

    /// Set a header on the message. Call-site options passed to `mail` win
    /// over these, and these win over class defaults.
    pub fn headers(&mut self, name: &str, value: impl Into<HeaderValue>) {
        self.message.headers_mut().insert(name, value);
    }

    pub fn attachments(&self) -> &Attachments {
        &self.attachments
    }

    /// Attachments must be added before `mail` is called.
    pub fn attachments_mut(&mut self) -> &mut Attachments {
        &mut self.attachments
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn message_mut(&mut self) -> &mut Message {
        &mut self.message
    }

    /// Whether the action produced a message.
    pub fn has_message(&self) -> bool {
        self.mail_was_called
    }

    /// Compose the message, rendering the action's templates.
    pub fn mail(&mut self, options: MailOptions) -> Result<&Message, MailError> {
        self.compose(options, None::<fn(&mut FormatCollector) -> Result<(), MailError>>)
    }

    /// Compose the message from the formats requested in `block`.
    ///
    /// ```ignore
    /// m.mail_with(MailOptions::new().to(email), |format| {
    ///     format.text();
    ///     format.html_with("<h1>Welcome</h1>");
    ///     Ok(())
    /// })?;
    /// ```
    pub fn mail_with<F>(&mut self, options: MailOptions, block: F) -> Result<&Message, MailError>
    where
        F: FnOnce(&mut FormatCollector) -> Result<(), MailError>,
    {
        self.compose(options, Some(block))
    }

    fn compose<F>(&mut self, options: MailOptions, block: Option<F>) -> Result<&Message, MailError>
    where
        F: FnOnce(&mut FormatCollector) -> Result<(), MailError>,
    {
        if self.mail_was_called && options.is_empty() && block.is_none() {
            return Ok(&self.message);
        }
        self.mail_was_called = true;
        self.attachments.freeze();

        let class = self.class.clone();
        let evaluated = class.defaults().evaluate(self);
        let setting = |name: &str| evaluated.get(name).map(HeaderValue::joined);

        let charset = options
            .charset
            .clone()
            .or_else(|| setting("charset"))
            .unwrap_or_else(|| "UTF-8".to_string());
        let default_content_type = setting("content_type").unwrap_or_else(|| "text/plain".into());
        let parts_order = options
            .parts_order
            .clone()
            .or_else(|| evaluated.get("parts_order").map(HeaderValue::to_list))
            .unwrap_or_default();
        let mime_version = options.mime_version.clone().or_else(|| setting("mime_version"));
        let template_path = options
            .template_path
            .clone()
            .or_else(|| setting("template_path"))
            .unwrap_or_else(|| class.mailer_name());
        let template_name = options
            .template_name
            .clone()
            .or_else(|| setting("template_name"))
            .unwrap_or_else(|| self.action_name.clone());

        // Defaults, then instance headers, then call-site headers.
        let mut headers: HeaderMap = evaluated
            .iter()
            .filter(|(name, _)| !SPECIAL_KEYS.contains(&key(name).as_str()))
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect();
        headers.merge(self.message.headers.clone());
        headers.merge(options.headers);
        if !headers.contains("subject") {
            headers.insert("Subject", self.default_subject());
        }

        // Call-site choice first, then the class defaults.
        let delivery_method = options
            .delivery_method
            .clone()
            .or_else(|| setting("delivery_method").map(DeliveryMethodChoice::from));
        let delivery_method_options = options
            .delivery_method_options
            .clone()
            .or_else(|| setting("delivery_method_options").map(MethodOptions::Json))
            .map(MethodOptions::into_settings)
            .transpose()?;
        self.message.delivery = class.resolve_delivery(
            delivery_method.as_ref(),
            delivery_method_options.as_ref(),
        )?;
        self.message.set_charset(charset.clone());
        self.message.mime_version = mime_version;
        self.message.headers = headers;

        let renderer = class.template_renderer();
        let lookup = TemplateLookup {
            renderer: renderer.as_ref(),
            path: &template_path,
            name: &template_name,
        };
        let mailer_name = class.mailer_name();
        let ctx = RenderContext {
            mailer: &mailer_name,
            action: &self.action_name,
            params: &self.params,
            assigns: &self.assigns,
        };
        let fragments = match (block, options.body) {
            (Some(block), _) => {
                let mut collector = FormatCollector::default();
                block(&mut collector)?;
                collect_from_block(collector, &lookup, &ctx)?
            }
            (None, Some(body)) => collect_from_body(body, &default_content_type),
            (None, None) => collect_from_templates(&lookup, &ctx)?,
        };

        assemble(
            &mut self.message,
            Assembly {
                fragments,
                attachments: &self.attachments,
                explicit_content_type: options.content_type.as_deref(),
                default_content_type: &default_content_type,
                charset: &charset,
                parts_order: &parts_order,
            },
        );

        tracing::debug!(
            mailer = class.name(),
            action = %self.action_name,
            parts = self.message.parts().len(),
            "composed message"
        );
        Ok(&self.message)
    }

    fn default_subject(&self) -> String {
        let scope = format!(
            "{}.{}",
            self.class.mailer_name().replace('/', "."),
            self.action_name
        );
        self.class
            .translator()
            .translate(&scope, "subject", &humanize(&self.action_name))
    }

    /// Run the action, handing its error to the class's rescue handlers.
    pub(crate) fn process(&mut self, args: &[Value]) -> Result<(), MailError> {
        let class = self.class.clone();
        class.check_action(&self.action_name)?;
        let Some(action) = class.find_action(&self.action_name) else {
            return Ok(());
        };

        tracing::debug!(mailer = class.name(), action = %self.action_name, "processing action");
        match action(self, args) {
            Ok(()) => Ok(()),
            Err(err) => class.rescue_handlers().handle(err, self),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;
    use crate::mail::defaults::DefaultValue;
    use crate::mail::template::{MemoryTemplates, MemoryTranslations};
    use crate::mail::ErrorKind;

    fn class() -> Arc<MailerClass> {
        let class = MailerClass::new("UserMailer");
        class.set_delivery_method("test");
        class.default("from", "app@example.com");
        class.set_template_renderer(
            MemoryTemplates::new()
                .add("user_mailer", "welcome", "text", |ctx| {
                    format!("Hi {}", ctx.get("name").unwrap_or_default())
                })
                .add("user_mailer", "welcome", "html", |ctx| {
                    format!("<p>Hi {}</p>", ctx.get("name").unwrap_or_default())
                }),
        );
        class
    }

    #[test]
    fn call_site_beats_instance_beats_defaults() {
        let class = class();
        class.default("reply_to", "noreply@example.com");
        class.default("X-Mailer", "letterbox");

        let mut m = Composer::new(class, "welcome", Params::new());
        m.headers("X-Mailer", "custom");
        m.headers("Reply-To", "support@example.com");
        let message = m
            .mail(
                MailOptions::new()
                    .to("ada@example.com")
                    .reply_to("ada-team@example.com")
                    .body("Hello"),
            )
            .unwrap();

        assert_eq!(message.from(), vec!["app@example.com"]);
        assert_eq!(message.header("x-mailer").and_then(|v| v.as_text()), Some("custom"));
        assert_eq!(
            message.header("reply-to").map(HeaderValue::to_list),
            Some(vec!["ada-team@example.com".to_string()])
        );
        assert!(message.header("charset").is_none());
        assert!(message.header("parts_order").is_none());
        assert_eq!(message.mime_version(), Some("1.0"));
    }

    #[test]
    fn renders_templates_into_alternative() {
        let mut m = Composer::new(class(), "welcome", Params::new());
        m.assign("name", "Ada");
        let message = m.mail(MailOptions::new().to("ada@example.com")).unwrap();

        assert_eq!(message.mime(), Some("multipart/alternative"));
        assert_eq!(message.parts()[0].body_text(), Some("Hi Ada"));
        assert_eq!(message.parts()[1].body_text(), Some("<p>Hi Ada</p>"));
        assert_eq!(message.subject(), Some("Welcome"));
        assert_eq!(message.delivery_method_name(), Some("test"));
    }

    #[test]
    fn body_option_uses_class_content_type() {
        let class = class();
        class.default("content_type", "text/html");
        let mut m = Composer::new(class, "welcome", Params::new());
        let message = m
            .mail(MailOptions::new().to("ada@example.com").body("<b>hi</b>"))
            .unwrap();
        assert_eq!(message.mime(), Some("text/html"));
        assert_eq!(message.body_text(), Some("<b>hi</b>"));
    }

    #[test]
    fn block_formats() {
        let mut m = Composer::new(class(), "welcome", Params::new());
        m.assign("name", "Bob");
        let message = m
            .mail_with(MailOptions::new().to("bob@example.com"), |format| {
                format.html();
                format.text_with("Plain Bob");
                Ok(())
            })
            .unwrap();

        let bodies: Vec<_> = message.parts().iter().map(|p| p.body_text()).collect();
        assert_eq!(bodies, vec![Some("Plain Bob"), Some("<p>Hi Bob</p>")]);
    }

    #[test]
    fn subject_from_translations() {
        let class = class();
        class.set_translator(
            MemoryTranslations::new().insert("user_mailer.welcome.subject", "Welcome aboard"),
        );
        let mut m = Composer::new(class, "welcome", Params::new());
        let message = m.mail(MailOptions::new().body("x")).unwrap();
        assert_eq!(message.subject(), Some("Welcome aboard"));
    }

    #[test]
    fn producers_run_once_per_composition() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let base = class();
        base.default(
            "X-Request",
            DefaultValue::lazy(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                "abc"
            }),
        );
        let child = MailerClass::inherit("AdminMailer", &base);
        child.default("X-Other", DefaultValue::with_mailer(|m: &Composer| m.action_name().to_string()));

        let mut m = Composer::new(child, "welcome", Params::new());
        let message = m.mail(MailOptions::new().body("x")).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(message.header("x-other").and_then(|v| v.as_text()), Some("welcome"));
    }

    #[test]
    fn second_mail_call_returns_existing_message() {
        let mut m = Composer::new(class(), "welcome", Params::new());
        m.mail(MailOptions::new().body("first")).unwrap();
        let message = m.mail(MailOptions::new()).unwrap();
        assert_eq!(message.body_text(), Some("first"));
    }

    #[test]
    fn attachments_after_mail_fail() {
        let mut m = Composer::new(class(), "welcome", Params::new());
        m.attachments_mut().add("a.txt", "a").unwrap();
        m.mail(MailOptions::new().body("x")).unwrap();
        let err = m.attachments_mut().add("b.txt", "b").unwrap_err();
        assert!(matches!(err, MailError::AttachmentsAfterMail));
    }

    #[test]
    fn missing_templates() {
        let mut m = Composer::new(class(), "goodbye", Params::new());
        let err = m.mail(MailOptions::new()).unwrap_err();
        assert!(matches!(err, MailError::MissingTemplate { ref name, .. } if name == "goodbye"));
    }

    #[test]
    fn template_name_override() {
        let mut m = Composer::new(class(), "greet", Params::new());
        let message = m
            .mail(MailOptions::new().template_name("welcome").template_path("user_mailer"))
            .unwrap();
        assert!(message.is_multipart());
    }

    fn capturing(class: &MailerClass) -> Arc<std::sync::Mutex<Option<Settings>>> {
        let seen = Arc::new(std::sync::Mutex::new(None));
        let record = seen.clone();
        class.register_delivery_method(
            "capture",
            move |settings: &Settings| {
                *record.lock().unwrap() = Some(settings.clone());
                Ok(Arc::new(crate::mail::TestDelivery::new(crate::mail::Deliveries::new()))
                    as Arc<dyn crate::mail::DeliveryMethod>)
            },
            Settings::new(),
        );
        seen
    }

    #[test]
    fn delivery_method_defaults_apply_without_call_site_choice() {
        let class = class();
        let seen = capturing(&class);
        let mut options = Settings::new();
        options.insert("location".into(), json!("/tmp/outbox"));
        class.default("delivery_method", "capture");
        class.default("delivery_method_options", options);

        let mut m = Composer::new(class.clone(), "welcome", Params::new());
        let message = m.mail(MailOptions::new().body("x")).unwrap();
        assert_eq!(message.delivery_method_name(), Some("capture"));
        let settings = seen.lock().unwrap().clone().unwrap();
        assert_eq!(settings.get("location"), Some(&json!("/tmp/outbox")));
        assert!(message.header("delivery_method").is_none());
        assert!(message.header("delivery_method_options").is_none());

        let mut m = Composer::new(class, "welcome", Params::new());
        let message = m.mail(MailOptions::new().body("x").delivery_method("test")).unwrap();
        assert_eq!(message.delivery_method_name(), Some("test"));
    }

    #[test]
    fn delivery_method_options_header_key() {
        let class = class();
        let seen = capturing(&class);

        let mut m = Composer::new(class.clone(), "welcome", Params::new());
        let message = m
            .mail(
                MailOptions::new()
                    .body("x")
                    .header("delivery_method", "capture")
                    .header("delivery-method-options", r#"{"port": 2525}"#),
            )
            .unwrap();
        assert!(message.header("delivery_method_options").is_none());
        let settings = seen.lock().unwrap().clone().unwrap();
        assert_eq!(settings.get("port"), Some(&json!(2525)));

        let mut m = Composer::new(class, "welcome", Params::new());
        let err = m
            .mail(
                MailOptions::new()
                    .body("x")
                    .header("delivery_method_options", "port=2525"),
            )
            .unwrap_err();
        assert!(matches!(err, MailError::InvalidSettings { .. }));
    }

    #[test]
    fn unknown_delivery_method_fails_composition() {
        let mut m = Composer::new(class(), "welcome", Params::new());
        let err = m
            .mail(MailOptions::new().body("x").delivery_method("pigeon"))
            .unwrap_err();
        assert!(matches!(err, MailError::UnknownDeliveryMethod(_)));
    }

    #[test]
    fn rescued_action_errors() {
        let class = class();
        class.action("broken", |_, _| Err(MailError::action(anyhow::anyhow!("no user"))));
        class.action("misconfigured", |m, _| {
            m.mail(MailOptions::new().content_type("text/plain"))?;
            Ok(())
        });
        class.rescue_from(ErrorKind::Action, |_, m| {
            m.assign("rescued", true);
            crate::mail::Rescue::Handled
        });

        let mut m = Composer::new(class.clone(), "broken", Params::new());
        m.process(&[]).unwrap();
        assert_eq!(m.assigns().get("rescued"), Some(&json!(true)));
        assert!(!m.has_message());

        let mut m = Composer::new(class, "misconfigured", Params::new());
        assert!(matches!(m.process(&[]), Err(MailError::MissingTemplate { .. })));
    }
}
