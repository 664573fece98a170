use crate::config::NavigatorConfig;
use crate::error::HostError;
use crate::js::value::{HostClass, HostObject, HostValue, ScriptScope};

pub struct Navigator {
    config: NavigatorConfig,
}

impl Navigator {
    pub fn new(config: NavigatorConfig) -> Self {
        Self { config }
    }

    pub fn user_agent(&self) -> &str {
        &self.config.user_agent
    }
}

impl HostObject for Navigator {
    fn class(&self) -> HostClass {
        HostClass::of::<Navigator>("Navigator")
    }

    fn has_property(&self, name: &str) -> bool {
        matches!(
            name,
            "userAgent"
                | "appName"
                | "appCodeName"
                | "appVersion"
                | "platform"
                | "language"
                | "languages"
                | "cookieEnabled"
                | "onLine"
        )
    }

    fn get_property(&self, name: &str) -> Result<HostValue, HostError> {
        Ok(match name {
            "userAgent" => self.config.user_agent.clone().into(),
            "appName" => "Netscape".into(),
            "appCodeName" => "Mozilla".into(),
            "appVersion" => self
                .config
                .user_agent
                .split_once('/')
                .map_or("", |(_, version)| version)
                .into(),
            "platform" => self.config.platform.clone().into(),
            "language" => self.config.language.clone().into(),
            "languages" => HostValue::List(vec![self.config.language.clone().into()]),
            "cookieEnabled" => false.into(),
            "onLine" => true.into(),
            _ => return Err(HostError::no_such_member("Navigator", name)),
        })
    }

    fn responds_to(&self, name: &str) -> bool {
        name == "javaEnabled"
    }

    fn call_method(
        &self,
        _scope: &dyn ScriptScope,
        name: &str,
        _args: Vec<HostValue>,
    ) -> Result<HostValue, HostError> {
        match name {
            "javaEnabled" => Ok(false.into()),
            _ => Err(HostError::no_such_member("Navigator", name)),
        }
    }
}
