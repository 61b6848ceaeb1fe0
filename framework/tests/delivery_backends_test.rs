use std::path::Path;
use std::sync::Arc;

use letterbox::mail::{
    Composer, Deliveries, DeliveryOutcome, Settings, TestDelivery,
};
use letterbox::{MailError, MailOptions, MailerClass};
use serde_json::{json, Value};

fn settings(value: Value) -> Settings {
    match value {
        Value::Object(map) => map,
        _ => Settings::new(),
    }
}

fn notice_mailer(name: &str) -> Arc<MailerClass> {
    let class = MailerClass::new(name);
    class.default("from", "ops@example.com");
    class.action("notice", |m: &mut Composer, args: &[Value]| {
        let options = args
            .first()
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        let mut mail = MailOptions::new().to("ada@example.com").body("disk is full");
        if !options.is_empty() {
            mail = mail.delivery_method_options(options);
        }
        m.mail(mail)?;
        Ok(())
    });
    class
}

fn eml_files(dir: &Path) -> Vec<String> {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .map(|entry| entry.path())
                .filter(|path| path.extension().is_some_and(|ext| ext == "eml"))
                .map(|path| std::fs::read_to_string(path).unwrap_or_default())
                .collect()
        })
        .unwrap_or_default()
}

#[tokio::test]
async fn file_method_writes_eml_files() {
    let dir = tempfile::tempdir().unwrap();
    let outbox = dir.path().join("outbox");

    let class = notice_mailer("OpsMailer");
    class.set_delivery_method("file");
    class.set_delivery_settings("file", settings(json!({ "location": outbox })));

    let outcome = class
        .deliver("notice", vec![])
        .unwrap()
        .deliver_now()
        .await
        .unwrap();
    assert_eq!(outcome, DeliveryOutcome::Delivered);

    let written = eml_files(&outbox);
    assert_eq!(written.len(), 1);
    assert!(written[0].contains("Subject: Notice"));
    assert!(written[0].contains("disk is full"));
}

#[tokio::test]
async fn call_site_options_override_class_settings() {
    let dir = tempfile::tempdir().unwrap();
    let class_dir = dir.path().join("class");
    let call_dir = dir.path().join("call");

    let class = notice_mailer("OpsMailer");
    class.set_delivery_method("file");
    class.set_delivery_settings("file", settings(json!({ "location": class_dir })));

    class
        .deliver("notice", vec![json!({ "location": call_dir })])
        .unwrap()
        .deliver_now()
        .await
        .unwrap();

    assert!(eml_files(&class_dir).is_empty());
    assert_eq!(eml_files(&call_dir).len(), 1);
}

#[tokio::test]
async fn test_method_records_detached_messages() {
    let deliveries = Deliveries::new();
    let class = notice_mailer("OpsMailer");
    class.register_delivery_method(
        "test",
        TestDelivery::constructor(deliveries.clone()),
        Settings::new(),
    );
    class.set_delivery_method("test");

    for _ in 0..2 {
        class
            .deliver("notice", vec![])
            .unwrap()
            .deliver_now()
            .await
            .unwrap();
    }

    assert_eq!(deliveries.len(), 2);
    let last = deliveries.last().unwrap();
    assert_eq!(last.to(), vec!["ada@example.com"]);
    assert!(last.delivery_method().is_none());
}

#[tokio::test]
async fn registrations_are_scoped_to_the_class_tree() {
    let parent = notice_mailer("ApplicationMailer");
    let child = MailerClass::inherit("OpsMailer", &parent);
    child.register_delivery_method(
        "pigeon",
        TestDelivery::constructor(Deliveries::new()),
        Settings::new(),
    );

    assert!(child.delivery_methods().get("pigeon").is_some());
    assert!(parent.delivery_methods().get("pigeon").is_none());
    assert!(child.delivery_methods().get("sendmail").is_some());

    parent.set_delivery_method("pigeon");
    let err = parent.deliver("notice", vec![]).unwrap().message().unwrap_err();
    assert!(matches!(err, MailError::UnknownDeliveryMethod(name) if name == "pigeon"));
}

#[tokio::test]
async fn sendmail_settings_reject_bad_types() {
    let class = notice_mailer("OpsMailer");
    class.set_delivery_method("sendmail");
    class.set_delivery_settings("sendmail", settings(json!({ "location": 42 })));

    let err = class.deliver("notice", vec![]).unwrap().message().unwrap_err();
    assert!(matches!(err, MailError::InvalidSettings { .. }));
}
