use crate::config::ScreenConfig;
use crate::error::HostError;
use crate::js::value::{HostClass, HostObject, HostValue};

/// Fixed screen geometry; windows report the full screen as their viewport.
pub struct Screen {
    config: ScreenConfig,
}

impl Screen {
    pub fn new(config: ScreenConfig) -> Self {
        Self { config }
    }

    pub fn width(&self) -> u32 {
        self.config.width
    }

    pub fn height(&self) -> u32 {
        self.config.height
    }
}

impl HostObject for Screen {
    fn class(&self) -> HostClass {
        HostClass::of::<Screen>("Screen")
    }

    fn has_property(&self, name: &str) -> bool {
        matches!(
            name,
            "width" | "height" | "availWidth" | "availHeight" | "colorDepth" | "pixelDepth"
        )
    }

    fn get_property(&self, name: &str) -> Result<HostValue, HostError> {
        match name {
            "width" | "availWidth" => Ok(self.config.width.into()),
            "height" | "availHeight" => Ok(self.config.height.into()),
            "colorDepth" | "pixelDepth" => Ok(self.config.color_depth.into()),
            _ => Err(HostError::no_such_member("Screen", name)),
        }
    }
}
