//! Routing of validation-layer messages.
//!
//! The debug messenger hands every message to a [`DiagnosticSink`]. The
//! default [`LogSink`] forwards to the `log` facade at the matching level.

use std::ffi::{c_void, CStr};
use ash::vk;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Verbose,
    Info,
    Warning,
    Error,
}

impl From<vk::DebugUtilsMessageSeverityFlagsEXT> for Severity {
    fn from(flags: vk::DebugUtilsMessageSeverityFlagsEXT) -> Self {
        if flags.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
            Severity::Error
        } else if flags.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
            Severity::Warning
        } else if flags.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
            Severity::Info
        } else {
            Severity::Verbose
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    General,
    Validation,
    Performance,
    Unknown,
}

impl From<vk::DebugUtilsMessageTypeFlagsEXT> for MessageKind {
    fn from(flags: vk::DebugUtilsMessageTypeFlagsEXT) -> Self {
        match flags {
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL => MessageKind::General,
            vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION => MessageKind::Validation,
            vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE => MessageKind::Performance,
            _ => MessageKind::Unknown,
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self {
            MessageKind::General => "[General]",
            MessageKind::Validation => "[Validation]",
            MessageKind::Performance => "[Performance]",
            MessageKind::Unknown => "[Unknown]",
        };
        f.write_str(tag)
    }
}

pub trait DiagnosticSink: Send + Sync {
    fn message(&self, severity: Severity, kind: MessageKind, text: &str);
}

#[derive(Debug, Default)]
pub struct LogSink;

impl DiagnosticSink for LogSink {
    fn message(&self, severity: Severity, kind: MessageKind, text: &str) {
        match severity {
            Severity::Verbose => log::trace!("{} {}", kind, text),
            Severity::Info => log::info!("{} {}", kind, text),
            Severity::Warning => log::warn!("{} {}", kind, text),
            Severity::Error => log::error!("{} {}", kind, text),
        }
    }
}

/// Messenger create info routed to `sink`.
///
/// `sink` is passed as the callback's user data, so it must stay at a fixed
/// address for as long as the messenger (or the instance, when chained into
/// instance creation) exists.
pub fn debug_utils_messenger_create_info(
    sink: &Box<dyn DiagnosticSink>,
) -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
    let message_severity = vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
        | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
        | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR;
    let message_type = vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
        | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
        | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE;
    vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(message_severity)
        .message_type(message_type)
        .pfn_user_callback(Some(debug_callback))
        .user_data(sink as *const Box<dyn DiagnosticSink> as *mut c_void)
}

unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    p_user_data: *mut c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() || p_user_data.is_null() {
        return vk::FALSE;
    }

    let (sink, text) = unsafe {
        let sink = &*(p_user_data as *const Box<dyn DiagnosticSink>);
        let p_message = (*p_callback_data).p_message;
        let text = if p_message.is_null() {
            std::borrow::Cow::Borrowed("")
        } else {
            CStr::from_ptr(p_message).to_string_lossy()
        };
        (sink, text)
    };
    sink.message(message_severity.into(), message_type.into(), &text);

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Recorder(Arc<Mutex<Vec<(Severity, MessageKind, String)>>>);

    impl DiagnosticSink for Recorder {
        fn message(&self, severity: Severity, kind: MessageKind, text: &str) {
            self.0.lock().unwrap().push((severity, kind, text.to_owned()));
        }
    }

    #[test]
    fn severity_follows_the_highest_bit() {
        use vk::DebugUtilsMessageSeverityFlagsEXT as F;
        assert_eq!(Severity::from(F::VERBOSE), Severity::Verbose);
        assert_eq!(Severity::from(F::INFO), Severity::Info);
        assert_eq!(Severity::from(F::WARNING), Severity::Warning);
        assert_eq!(Severity::from(F::ERROR | F::WARNING), Severity::Error);
    }

    #[test]
    fn kind_maps_single_bits_only() {
        use vk::DebugUtilsMessageTypeFlagsEXT as F;
        assert_eq!(MessageKind::from(F::VALIDATION), MessageKind::Validation);
        assert_eq!(MessageKind::from(F::PERFORMANCE), MessageKind::Performance);
        assert_eq!(MessageKind::from(F::GENERAL | F::VALIDATION), MessageKind::Unknown);
    }

    #[test]
    fn callback_forwards_to_the_sink() {
        let messages = Arc::new(Mutex::new(Vec::new()));
        let sink: Box<dyn DiagnosticSink> = Box::new(Recorder(messages.clone()));
        let info = debug_utils_messenger_create_info(&sink);

        let text = c"vkCreateDevice: missing queue";
        let data = vk::DebugUtilsMessengerCallbackDataEXT {
            p_message: text.as_ptr(),
            ..Default::default()
        };
        let callback = info.pfn_user_callback.unwrap();
        let ret = unsafe {
            callback(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING,
                vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION,
                &data,
                info.p_user_data,
            )
        };

        assert_eq!(ret, vk::FALSE);
        let messages = messages.lock().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(
            messages[0],
            (Severity::Warning, MessageKind::Validation, "vkCreateDevice: missing queue".to_owned())
        );
    }
}
