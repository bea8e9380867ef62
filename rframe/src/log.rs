use ash::vk;

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
pub enum VulkanLogLevel {
    Verbose,
    Info,
    Warning,
    Error,
}

impl VulkanLogLevel {
    /// The debug-utils severity mask matching this level and above.
    pub fn severity_mask(self) -> vk::DebugUtilsMessageSeverityFlagsEXT {
        match self {
            VulkanLogLevel::Verbose => {
                vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                    | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
            }
            VulkanLogLevel::Info => {
                vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
            }
            VulkanLogLevel::Warning => {
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
            }
            VulkanLogLevel::Error => vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        }
    }
}
