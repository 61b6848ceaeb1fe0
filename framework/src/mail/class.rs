//! Mailer classes: named, inheritable bundles of actions and configuration.
//!
//! Every registry on a class (backends, observers, callbacks, ...) is read
//! through the parent chain until a class that owns a copy is found. The first
//! write on a class copies the inherited value into the class, so changes
//! never leak into the parent or into sibling classes.

use std::collections::HashMap;
use std::fmt;
use std::ops::ControlFlow;
use std::sync::Arc;

use heck::ToSnakeCase;
use parking_lot::RwLock;
use serde_json::{Map, Value};

use super::callbacks::{BoxFuture, CallbackChain, Next, Rescue, RescueHandlers};
use super::composer::Composer;
use super::defaults::{DefaultValue, HeaderDefaults};
use super::delivery::{
    BackendRegistry, DeliveryMethod, DeliveryMethodChoice, ResolvedMethod, Settings,
};
use super::message::Delivery;
use super::message_delivery::{MessageDelivery, Parameterized};
use super::observers::{Hooks, Interceptor, Observer};
use super::template::{MemoryTemplates, NoTranslations, TemplateRenderer, Translator};
use super::{ErrorKind, MailError};
use crate::config::DeliveryConfig;

/// An action: fills in the composer, usually ending with a call to
/// [`Composer::mail`].
pub type ActionFn = Arc<dyn Fn(&mut Composer, &[Value]) -> Result<(), MailError> + Send + Sync>;

/// A value owned by one class, or inherited when absent.
struct Inherited<T> {
    slot: RwLock<Option<Arc<T>>>,
}

impl<T> Inherited<T> {
    fn empty() -> Self {
        Self {
            slot: RwLock::new(None),
        }
    }

    fn with(value: T) -> Self {
        Self {
            slot: RwLock::new(Some(Arc::new(value))),
        }
    }

    fn get(&self) -> Option<Arc<T>> {
        self.slot.read().clone()
    }

    fn set(&self, value: T) {
        *self.slot.write() = Some(Arc::new(value));
    }
}

pub struct MailerClass {
    name: String,
    parent: Option<Arc<MailerClass>>,
    actions: RwLock<HashMap<String, ActionFn>>,
    defaults: RwLock<HeaderDefaults>,
    backends: Inherited<BackendRegistry>,
    delivery_settings: Inherited<HashMap<String, Settings>>,
    delivery_method: Inherited<DeliveryMethodChoice>,
    perform_deliveries: Inherited<bool>,
    raise_delivery_errors: Inherited<bool>,
    deliver_later_queue_name: Inherited<String>,
    observers: Inherited<Hooks<dyn Observer>>,
    interceptors: Inherited<Hooks<dyn Interceptor>>,
    callbacks: Inherited<CallbackChain>,
    rescue_handlers: Inherited<RescueHandlers>,
    template_renderer: Inherited<Arc<dyn TemplateRenderer>>,
    translator: Inherited<Arc<dyn Translator>>,
}

type Field<T> = fn(&MailerClass) -> &Inherited<T>;

impl MailerClass {
    fn blank(name: String, parent: Option<Arc<MailerClass>>) -> Self {
        Self {
            name,
            parent,
            actions: RwLock::new(HashMap::new()),
            defaults: RwLock::new(HeaderDefaults::new()),
            backends: Inherited::empty(),
            delivery_settings: Inherited::empty(),
            delivery_method: Inherited::empty(),
            perform_deliveries: Inherited::empty(),
            raise_delivery_errors: Inherited::empty(),
            deliver_later_queue_name: Inherited::empty(),
            observers: Inherited::empty(),
            interceptors: Inherited::empty(),
            callbacks: Inherited::empty(),
            rescue_handlers: Inherited::empty(),
            template_renderer: Inherited::empty(),
            translator: Inherited::empty(),
        }
    }

    /// A root class, starting with the built-in delivery methods.
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        let mut class = Self::blank(name.into(), None);
        class.backends = Inherited::with(BackendRegistry::builtin());
        Arc::new(class)
    }

    /// A class inheriting everything from `parent`.
    pub fn inherit(name: impl Into<String>, parent: &Arc<MailerClass>) -> Arc<Self> {
        Arc::new(Self::blank(name.into(), Some(parent.clone())))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<&Arc<MailerClass>> {
        self.parent.as_ref()
    }

    /// `Admin::UserMailer` -> `admin/user_mailer`. Default template path and
    /// translation scope.
    pub fn mailer_name(&self) -> String {
        self.name
            .split("::")
            .map(|segment| segment.to_snake_case())
            .collect::<Vec<_>>()
            .join("/")
    }

    fn ancestors(&self) -> impl Iterator<Item = &MailerClass> {
        std::iter::successors(Some(self), |class| class.parent.as_deref())
    }

    fn inherited<T>(&self, field: Field<T>) -> Option<Arc<T>> {
        self.ancestors().find_map(|class| field(class).get())
    }

    /// Copy the inherited value into this class on first write, then edit it.
    fn modify<T: Clone + Default, R>(&self, field: Field<T>, edit: impl FnOnce(&mut T) -> R) -> R {
        let inherited = self.parent.as_ref().and_then(|parent| parent.inherited(field));
        let mut slot = field(self).slot.write();
        let value = slot.get_or_insert_with(|| inherited.unwrap_or_default());
        edit(Arc::make_mut(value))
    }

    // ---------------------------------------------------------------------
    // Actions
    // ---------------------------------------------------------------------

    /// Define an action.
    ///
    /// ```ignore
    /// class.action("welcome", |m, args| {
    ///     let email = args[0].as_str().unwrap_or_default();
    ///     m.mail(MailOptions::new().to(email).subject("Welcome!"))?;
    ///     Ok(())
    /// });
    /// ```
    pub fn action<F>(&self, name: impl Into<String>, action: F) -> &Self
    where
        F: Fn(&mut Composer, &[Value]) -> Result<(), MailError> + Send + Sync + 'static,
    {
        self.actions.write().insert(name.into(), Arc::new(action));
        self
    }

    pub fn find_action(&self, name: &str) -> Option<ActionFn> {
        self.ancestors()
            .find_map(|class| class.actions.read().get(name).cloned())
    }

    /// Every action reachable from this class, sorted.
    pub fn action_methods(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .ancestors()
            .flat_map(|class| class.actions.read().keys().cloned().collect::<Vec<_>>())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    // ---------------------------------------------------------------------
    // Header defaults
    // ---------------------------------------------------------------------

    /// Set a default header, or one of the special keys (`content_type`,
    /// `charset`, `parts_order`, `mime_version`, `template_path`, ...).
    pub fn default(&self, name: impl Into<String>, value: impl Into<DefaultValue>) -> &Self {
        self.defaults.write().set(name, value);
        self
    }

    /// Built-in defaults overlaid by every class from the root down.
    pub fn defaults(&self) -> HeaderDefaults {
        let chain: Vec<&MailerClass> = self.ancestors().collect();
        chain
            .iter()
            .rev()
            .fold(HeaderDefaults::builtin(), |merged, class| {
                class.defaults.read().merged_over(&merged)
            })
    }

    // ---------------------------------------------------------------------
    // Delivery methods
    // ---------------------------------------------------------------------

    pub fn register_delivery_method<F>(
        &self,
        name: impl Into<String>,
        constructor: F,
        defaults: Settings,
    ) where
        F: Fn(&Settings) -> Result<Arc<dyn DeliveryMethod>, MailError> + Send + Sync + 'static,
    {
        self.modify(|c| &c.backends, |registry| {
            registry.register(name, constructor, defaults)
        });
    }

    pub fn unregister_delivery_method(&self, name: &str) -> bool {
        self.modify(|c| &c.backends, |registry| registry.unregister(name))
    }

    pub fn delivery_methods(&self) -> Arc<BackendRegistry> {
        self.inherited(|c| &c.backends).unwrap_or_default()
    }

    /// Settings layered over a delivery method's defaults for this class,
    /// e.g. the SMTP host.
    pub fn set_delivery_settings(&self, method: impl Into<String>, settings: Settings) {
        let method = method.into();
        self.modify(|c| &c.delivery_settings, |all| {
            all.insert(method, settings);
        });
    }

    pub fn delivery_settings(&self, method: &str) -> Option<Settings> {
        self.inherited(|c| &c.delivery_settings)
            .and_then(|all| all.get(method).cloned())
    }

    pub fn set_delivery_method(&self, method: impl Into<DeliveryMethodChoice>) {
        self.delivery_method.set(method.into());
    }

    /// The class's delivery method; `smtp` unless configured.
    pub fn delivery_method(&self) -> DeliveryMethodChoice {
        self.inherited(|c| &c.delivery_method)
            .map(|choice| (*choice).clone())
            .unwrap_or_else(|| DeliveryMethodChoice::Named("smtp".to_string()))
    }

    pub fn set_perform_deliveries(&self, perform: bool) {
        self.perform_deliveries.set(perform);
    }

    pub fn perform_deliveries(&self) -> bool {
        self.inherited(|c| &c.perform_deliveries)
            .map_or(true, |v| *v)
    }

    pub fn set_raise_delivery_errors(&self, raise: bool) {
        self.raise_delivery_errors.set(raise);
    }

    pub fn raise_delivery_errors(&self) -> bool {
        self.inherited(|c| &c.raise_delivery_errors)
            .map_or(true, |v| *v)
    }

    pub fn set_deliver_later_queue_name(&self, queue: impl Into<String>) {
        self.deliver_later_queue_name.set(queue.into());
    }

    /// Queue used by `deliver_later`; `mailers` unless configured.
    pub fn deliver_later_queue_name(&self) -> String {
        self.inherited(|c| &c.deliver_later_queue_name)
            .map(|queue| (*queue).clone())
            .unwrap_or_else(|| "mailers".to_string())
    }

    /// Apply settings loaded from the environment.
    pub fn configure(&self, config: &DeliveryConfig) {
        self.set_delivery_method(config.delivery_method.as_str());
        self.set_perform_deliveries(config.perform_deliveries);
        self.set_raise_delivery_errors(config.raise_delivery_errors);
        self.set_deliver_later_queue_name(config.deliver_later_queue_name.as_str());
    }

    /// Build the delivery method for one message and bundle it with the
    /// class's delivery flags.
    pub(crate) fn resolve_delivery(
        &self,
        choice: Option<&DeliveryMethodChoice>,
        call_settings: Option<&Settings>,
    ) -> Result<Delivery, MailError> {
        let choice = choice.cloned().unwrap_or_else(|| self.delivery_method());
        let class_settings = match &choice {
            DeliveryMethodChoice::Named(name) => self.delivery_settings(name),
            DeliveryMethodChoice::Instance(_) => None,
        };
        let ResolvedMethod { handler, name } =
            self.delivery_methods().resolve(
                &choice,
                class_settings.as_ref(),
                call_settings,
            )?;

        Ok(Delivery {
            handler: Some(handler),
            method_name: name,
            perform_deliveries: self.perform_deliveries(),
            raise_delivery_errors: self.raise_delivery_errors(),
        })
    }

    // ---------------------------------------------------------------------
    // Observers and interceptors
    // ---------------------------------------------------------------------

    pub fn register_observer(&self, observer: Arc<dyn Observer>) {
        self.modify(|c| &c.observers, |hooks| hooks.register(observer));
    }

    pub fn unregister_observer(&self, observer: &Arc<dyn Observer>) -> bool {
        self.modify(|c| &c.observers, |hooks| hooks.unregister(observer))
    }

    pub fn observers(&self) -> Arc<Hooks<dyn Observer>> {
        self.inherited(|c| &c.observers).unwrap_or_default()
    }

    pub fn register_interceptor(&self, interceptor: Arc<dyn Interceptor>) {
        self.modify(|c| &c.interceptors, |hooks| hooks.register(interceptor));
    }

    pub fn unregister_interceptor(&self, interceptor: &Arc<dyn Interceptor>) -> bool {
        self.modify(|c| &c.interceptors, |hooks| hooks.unregister(interceptor))
    }

    pub fn interceptors(&self) -> Arc<Hooks<dyn Interceptor>> {
        self.inherited(|c| &c.interceptors).unwrap_or_default()
    }

    // ---------------------------------------------------------------------
    // Deliver callbacks and rescue handlers
    // ---------------------------------------------------------------------

    /// Return [`ControlFlow::Break`] to halt delivery.
    pub fn before_deliver<F>(&self, callback: F)
    where
        F: Fn(&mut Composer) -> ControlFlow<()> + Send + Sync + 'static,
    {
        self.modify(|c| &c.callbacks, |chain| chain.before(callback));
    }

    pub fn after_deliver<F>(&self, callback: F)
    where
        F: Fn(&mut Composer) + Send + Sync + 'static,
    {
        self.modify(|c| &c.callbacks, |chain| chain.after(callback));
    }

    pub fn around_deliver<F>(&self, callback: F)
    where
        F: for<'a> Fn(&'a mut Composer, Next<'a>) -> BoxFuture<'a, Result<(), MailError>>
            + Send
            + Sync
            + 'static,
    {
        self.modify(|c| &c.callbacks, |chain| chain.around(callback));
    }

    pub fn callbacks(&self) -> Arc<CallbackChain> {
        self.inherited(|c| &c.callbacks).unwrap_or_default()
    }

    /// Handle [`ErrorKind::Action`] or [`ErrorKind::Transport`] errors.
    /// Later handlers are tried first.
    pub fn rescue_from<F>(&self, kind: ErrorKind, handler: F)
    where
        F: Fn(&MailError, &mut Composer) -> Rescue + Send + Sync + 'static,
    {
        self.modify(|c| &c.rescue_handlers, |handlers| handlers.add(kind, handler));
    }

    pub fn rescue_handlers(&self) -> Arc<RescueHandlers> {
        self.inherited(|c| &c.rescue_handlers).unwrap_or_default()
    }

    // ---------------------------------------------------------------------
    // Templates and translations
    // ---------------------------------------------------------------------

    pub fn set_template_renderer(&self, renderer: impl TemplateRenderer + 'static) {
        self.template_renderer.set(Arc::new(renderer));
    }

    pub fn template_renderer(&self) -> Arc<dyn TemplateRenderer> {
        self.inherited(|c| &c.template_renderer)
            .map(|renderer| (*renderer).clone())
            .unwrap_or_else(|| Arc::new(MemoryTemplates::new()))
    }

    pub fn set_translator(&self, translator: impl Translator + 'static) {
        self.translator.set(Arc::new(translator));
    }

    pub fn translator(&self) -> Arc<dyn Translator> {
        self.inherited(|c| &c.translator)
            .map(|translator| (*translator).clone())
            .unwrap_or_else(|| Arc::new(NoTranslations))
    }

    // ---------------------------------------------------------------------
    // Entry points
    // ---------------------------------------------------------------------

    /// A lazy delivery of `action` called with `args`. Nothing runs until the
    /// message is requested or delivered.
    pub fn deliver(
        self: &Arc<Self>,
        action: &str,
        args: Vec<Value>,
    ) -> Result<MessageDelivery, MailError> {
        self.check_action(action)?;
        Ok(MessageDelivery::new(self.clone(), action, args, None))
    }

    /// Deliveries that carry `params`, readable through [`Composer::params`].
    pub fn with(self: &Arc<Self>, params: Map<String, Value>) -> Parameterized {
        Parameterized::new(self.clone(), params)
    }

    pub(crate) fn check_action(&self, action: &str) -> Result<(), MailError> {
        match self.find_action(action) {
            Some(_) => Ok(()),
            None => Err(MailError::NoSuchAction {
                mailer: self.name.clone(),
                action: action.to_string(),
            }),
        }
    }
}

impl fmt::Debug for MailerClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MailerClass")
            .field("name", &self.name)
            .field("parent", &self.parent.as_ref().map(|p| p.name.as_str()))
            .field("actions", &self.action_methods())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::mail::delivery::object;
    use crate::mail::{Deliveries, Message, TestDelivery};

    #[test]
    fn mailer_names() {
        assert_eq!(MailerClass::new("UserMailer").mailer_name(), "user_mailer");
        assert_eq!(
            MailerClass::new("Admin::NotificationMailer").mailer_name(),
            "admin/notification_mailer"
        );
    }

    #[test]
    fn actions_are_inherited() {
        let base = MailerClass::new("ApplicationMailer");
        base.action("shared", |_, _| Ok(()));
        let child = MailerClass::inherit("UserMailer", &base);
        child.action("welcome", |_, _| Ok(()));

        assert!(child.find_action("shared").is_some());
        assert!(base.find_action("welcome").is_none());
        assert_eq!(child.action_methods(), vec!["shared", "welcome"]);

        let err = child.deliver("nope", vec![]).err().unwrap();
        assert!(matches!(err, MailError::NoSuchAction { action, .. } if action == "nope"));
    }

    #[test]
    fn defaults_merge_down_the_chain() {
        let base = MailerClass::new("ApplicationMailer");
        base.default("from", "app@example.com");
        base.default("reply_to", "help@example.com");
        let child = MailerClass::inherit("UserMailer", &base);
        child.default("from", "users@example.com");

        let defaults = child.defaults();
        assert!(matches!(
            defaults.get("from"),
            Some(DefaultValue::Static(v)) if v.as_text() == Some("users@example.com")
        ));
        assert!(defaults.get("reply_to").is_some());
        assert!(defaults.get("charset").is_some());
        assert!(matches!(
            base.defaults().get("from"),
            Some(DefaultValue::Static(v)) if v.as_text() == Some("app@example.com")
        ));
    }

    #[test]
    fn backend_registry_is_copied_on_write() {
        let base = MailerClass::new("ApplicationMailer");
        let child = MailerClass::inherit("UserMailer", &base);

        child.register_delivery_method(
            "api",
            TestDelivery::constructor(Deliveries::new()),
            Settings::new(),
        );
        assert!(child.delivery_methods().get("api").is_some());
        assert!(child.delivery_methods().get("smtp").is_some());
        assert!(base.delivery_methods().get("api").is_none());

        assert!(child.unregister_delivery_method("smtp"));
        assert!(base.delivery_methods().get("smtp").is_some());
    }

    #[test]
    fn observers_are_independent_per_class() {
        let observer: Arc<dyn Observer> = Arc::new(|_: &Message| {});
        let base = MailerClass::new("ApplicationMailer");
        base.register_observer(observer.clone());
        let child = MailerClass::inherit("UserMailer", &base);

        assert_eq!(child.observers().len(), 1);
        assert!(child.unregister_observer(&observer));
        assert!(child.observers().is_empty());
        assert_eq!(base.observers().len(), 1);

        let interceptor: Arc<dyn Interceptor> = Arc::new(|_: &mut Message| {});
        child.register_interceptor(interceptor.clone());
        assert!(base.interceptors().is_empty());
        assert!(!base.unregister_interceptor(&interceptor));
        assert_eq!(child.interceptors().len(), 1);
    }

    #[test]
    fn delivery_flags_inherit() {
        let base = MailerClass::new("ApplicationMailer");
        assert!(base.perform_deliveries());
        assert!(base.raise_delivery_errors());
        assert_eq!(base.deliver_later_queue_name(), "mailers");

        base.set_perform_deliveries(false);
        let child = MailerClass::inherit("UserMailer", &base);
        assert!(!child.perform_deliveries());
        child.set_perform_deliveries(true);
        assert!(child.perform_deliveries());
        assert!(!base.perform_deliveries());
    }

    #[tokio::test]
    async fn resolves_with_class_settings() {
        let class = MailerClass::new("UserMailer");
        class.set_delivery_settings("smtp", object(json!({ "port": 2525 })));
        let delivery = class.resolve_delivery(None, None).unwrap();
        assert_eq!(delivery.method_name.as_deref(), Some("smtp"));
        assert!(delivery.handler.is_some());

        let bad = object(json!({ "port": "many" }));
        assert!(class.resolve_delivery(None, Some(&bad)).is_err());
        assert!(matches!(
            class.resolve_delivery(Some(&"fax".into()), None),
            Err(MailError::UnknownDeliveryMethod(_))
        ));
    }

    #[test]
    fn configure_from_config() {
        let class = MailerClass::new("UserMailer");
        class.configure(&DeliveryConfig {
            delivery_method: "test".to_string(),
            perform_deliveries: false,
            raise_delivery_errors: false,
            deliver_later_queue_name: "low".to_string(),
        });
        assert!(matches!(class.delivery_method(), DeliveryMethodChoice::Named(n) if n == "test"));
        assert!(!class.perform_deliveries());
        assert!(!class.raise_delivery_errors());
        assert_eq!(class.deliver_later_queue_name(), "low");
    }
}
