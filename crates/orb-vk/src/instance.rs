//! Vulkan instance creation.

use crate::error::{Result, VkError};
use ash::vk;
use std::ffi::{c_char, c_void, CStr, CString};

/// Khronos validation layer name.
pub const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// A created Vulkan instance together with its loader and debug messenger.
pub struct Instance {
    entry: ash::Entry,
    instance: ash::Instance,
    debug_utils: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    api_version: u32,
}

impl Instance {
    /// Get the loader entry points.
    pub fn entry(&self) -> &ash::Entry {
        &self.entry
    }

    /// Get the instance function table.
    pub fn raw(&self) -> &ash::Instance {
        &self.instance
    }

    /// Get the requested API version.
    pub fn api_version(&self) -> u32 {
        self.api_version
    }

    /// Returns `true` if a debug messenger is installed.
    pub fn has_debug_messenger(&self) -> bool {
        self.debug_utils.is_some()
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        unsafe {
            if let Some((loader, messenger)) = self.debug_utils.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// Builder for [`Instance`].
pub struct InstanceBuilder {
    app_name: String,
    engine_name: String,
    app_version: u32,
    api_version: u32,
    extensions: Vec<CString>,
    layers: Vec<CString>,
    validation: bool,
}

impl Default for InstanceBuilder {
    fn default() -> Self {
        Self {
            app_name: "orb".to_string(),
            engine_name: "orb".to_string(),
            app_version: vk::make_api_version(0, 0, 1, 0),
            api_version: vk::API_VERSION_1_3,
            extensions: Vec::new(),
            layers: Vec::new(),
            validation: cfg!(debug_assertions),
        }
    }
}

impl InstanceBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the application name.
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    /// Set the engine name.
    pub fn engine_name(mut self, name: impl Into<String>) -> Self {
        self.engine_name = name.into();
        self
    }

    /// Set the application version (`vk::make_api_version` encoded).
    pub fn app_version(mut self, version: u32) -> Self {
        self.app_version = version;
        self
    }

    /// Set the Vulkan API version to request.
    pub fn api_version(mut self, version: u32) -> Self {
        self.api_version = version;
        self
    }

    /// Request an instance extension.
    pub fn extension(mut self, name: &CStr) -> Self {
        push_unique(&mut self.extensions, name);
        self
    }

    /// Request several instance extensions.
    pub fn extensions<'a>(mut self, names: impl IntoIterator<Item = &'a CStr>) -> Self {
        for name in names {
            push_unique(&mut self.extensions, name);
        }
        self
    }

    /// Request an instance layer.
    pub fn layer(mut self, name: &CStr) -> Self {
        push_unique(&mut self.layers, name);
        self
    }

    /// Enable or disable the validation layer and debug messenger.
    pub fn validation(mut self, enable: bool) -> Self {
        self.validation = enable;
        self
    }

    /// Create the instance.
    pub fn build(mut self) -> Result<Instance> {
        let entry = unsafe { ash::Entry::load() }.map_err(|e| VkError::Loading(e.to_string()))?;

        if self.validation {
            push_unique(&mut self.extensions, ash::ext::debug_utils::NAME);
            push_unique(&mut self.layers, VALIDATION_LAYER);
        }

        #[cfg(target_os = "macos")]
        push_unique(&mut self.extensions, ash::khr::portability_enumeration::NAME);

        // Missing extensions are fatal
        let available_extensions = unsafe { entry.enumerate_instance_extension_properties(None)? };
        let available_extension_names: Vec<String> = available_extensions
            .iter()
            .filter_map(|props| props.extension_name_as_c_str().ok())
            .map(|name| name.to_string_lossy().into_owned())
            .collect();
        let missing = missing_names(&self.extensions, &available_extension_names);
        if !missing.is_empty() {
            return Err(VkError::ExtensionNotSupported(missing.join(", ")));
        }

        // Missing layers are dropped
        let available_layers = unsafe { entry.enumerate_instance_layer_properties()? };
        let available_layer_names: Vec<String> = available_layers
            .iter()
            .filter_map(|props| props.layer_name_as_c_str().ok())
            .map(|name| name.to_string_lossy().into_owned())
            .collect();
        for layer in missing_names(&self.layers, &available_layer_names) {
            tracing::warn!("Layer {layer} not available, continuing without it");
            self.layers.retain(|l| l.to_string_lossy() != layer);
        }
        let validation_active = self.validation
            && self.layers.iter().any(|l| l.as_c_str() == VALIDATION_LAYER);

        let app_name = CString::new(self.app_name.as_str())
            .map_err(|e| VkError::InvalidArgument(format!("app name: {e}")))?;
        let engine_name = CString::new(self.engine_name.as_str())
            .map_err(|e| VkError::InvalidArgument(format!("engine name: {e}")))?;

        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name)
            .application_version(self.app_version)
            .engine_name(&engine_name)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(self.api_version);

        let extension_ptrs: Vec<*const c_char> =
            self.extensions.iter().map(|ext| ext.as_ptr()).collect();
        let layer_ptrs: Vec<*const c_char> = self.layers.iter().map(|l| l.as_ptr()).collect();

        // Required for MoltenVK on macOS
        #[cfg(target_os = "macos")]
        let create_flags = vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
        #[cfg(not(target_os = "macos"))]
        let create_flags = vk::InstanceCreateFlags::empty();

        // Chained so instance creation/destruction is covered too
        let mut messenger_info = debug_messenger_info();

        let mut create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extension_ptrs)
            .enabled_layer_names(&layer_ptrs)
            .flags(create_flags);
        if validation_active {
            create_info = create_info.push_next(&mut messenger_info);
        }

        let instance = unsafe { entry.create_instance(&create_info, None)? };

        let debug_utils = if validation_active {
            let loader = ash::ext::debug_utils::Instance::new(&entry, &instance);
            let messenger_info = debug_messenger_info();
            match unsafe { loader.create_debug_utils_messenger(&messenger_info, None) } {
                Ok(messenger) => Some((loader, messenger)),
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e.into());
                }
            }
        } else {
            None
        };

        tracing::info!(
            "Vulkan instance created: {} (API {}.{}, validation: {})",
            self.app_name,
            vk::api_version_major(self.api_version),
            vk::api_version_minor(self.api_version),
            validation_active
        );

        Ok(Instance {
            entry,
            instance,
            debug_utils,
            api_version: self.api_version,
        })
    }
}

fn push_unique(list: &mut Vec<CString>, name: &CStr) {
    if !list.iter().any(|existing| existing.as_c_str() == name) {
        list.push(name.to_owned());
    }
}

/// Names from `requested` that do not appear in `available`.
pub fn missing_names(requested: &[CString], available: &[String]) -> Vec<String> {
    requested
        .iter()
        .map(|name| name.to_string_lossy().into_owned())
        .filter(|name| !available.iter().any(|a| a == name))
        .collect()
}

fn debug_messenger_info<'a>() -> vk::DebugUtilsMessengerCreateInfoEXT<'a> {
    vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                | vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback))
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut c_void,
) -> vk::Bool32 {
    let message = if callback_data.is_null() || unsafe { (*callback_data).p_message.is_null() } {
        std::borrow::Cow::Borrowed("<no message>")
    } else {
        unsafe { CStr::from_ptr((*callback_data).p_message) }.to_string_lossy()
    };

    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        tracing::error!(target: "vulkan", "[{message_type:?}] {message}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        tracing::warn!(target: "vulkan", "[{message_type:?}] {message}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        tracing::debug!(target: "vulkan", "[{message_type:?}] {message}");
    } else {
        tracing::trace!(target: "vulkan", "[{message_type:?}] {message}");
    }

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_names_reports_only_absent() {
        let requested = vec![
            CString::new("VK_KHR_surface").unwrap(),
            CString::new("VK_EXT_debug_utils").unwrap(),
        ];
        let available = vec!["VK_KHR_surface".to_string()];
        assert_eq!(
            missing_names(&requested, &available),
            vec!["VK_EXT_debug_utils".to_string()]
        );
    }

    #[test]
    fn extensions_are_deduplicated() {
        let builder = InstanceBuilder::new()
            .extension(ash::khr::surface::NAME)
            .extensions([ash::khr::surface::NAME, ash::ext::debug_utils::NAME]);
        assert_eq!(builder.extensions.len(), 2);
    }

    #[test]
    fn defaults_request_vulkan_1_3() {
        let builder = InstanceBuilder::new();
        assert_eq!(builder.api_version, vk::API_VERSION_1_3);
        assert_eq!(builder.validation, cfg!(debug_assertions));
    }
}
