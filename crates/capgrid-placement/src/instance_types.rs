//! Memory and vCPU per supported instance type.

/// Hardware of one instance type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstanceSpec {
    pub memory_mib: u64,
    pub vcpus: u64,
}

impl InstanceSpec {
    const fn new(memory_mib: u64, vcpus: u64) -> Self {
        Self { memory_mib, vcpus }
    }
}

/// CPU units the orchestration service grants per vCPU.
pub const CPU_UNITS_PER_VCPU: u64 = 1024;

/// Look up an instance type such as `"m4.large"`.
pub fn instance_spec(instance_type: &str) -> Option<InstanceSpec> {
    let spec = match instance_type {
        "t2.nano" => InstanceSpec::new(512, 1),
        "t2.micro" => InstanceSpec::new(1024, 1),
        "t2.small" => InstanceSpec::new(2048, 1),
        "t2.medium" => InstanceSpec::new(4096, 2),
        "t2.large" => InstanceSpec::new(8192, 2),

        "m4.large" => InstanceSpec::new(8192, 2),
        "m4.xlarge" => InstanceSpec::new(16384, 4),
        "m4.2xlarge" => InstanceSpec::new(32768, 8),
        "m4.4xlarge" => InstanceSpec::new(65536, 16),
        "m4.10xlarge" => InstanceSpec::new(163840, 40),

        "m3.medium" => InstanceSpec::new(3840, 1),
        "m3.large" => InstanceSpec::new(7680, 2),
        "m3.xlarge" => InstanceSpec::new(15360, 4),
        "m3.2xlarge" => InstanceSpec::new(30720, 8),

        "c4.large" | "c3.large" => InstanceSpec::new(3840, 2),
        "c4.xlarge" | "c3.xlarge" => InstanceSpec::new(7680, 4),
        "c4.2xlarge" | "c3.2xlarge" => InstanceSpec::new(15360, 8),
        "c4.4xlarge" | "c3.4xlarge" => InstanceSpec::new(30720, 16),
        "c4.8xlarge" => InstanceSpec::new(61440, 36),
        "c3.8xlarge" => InstanceSpec::new(61440, 32),

        "g2.2xlarge" => InstanceSpec::new(15360, 8),
        "g2.8xlarge" => InstanceSpec::new(61440, 32),

        "x1.32xlarge" => InstanceSpec::new(1998848, 128),

        "r3.large" | "i3.large" => InstanceSpec::new(15616, 2),
        "r3.xlarge" | "i3.xlarge" => InstanceSpec::new(31232, 4),
        "r3.2xlarge" | "i3.2xlarge" => InstanceSpec::new(62464, 8),
        "r3.4xlarge" | "i3.4xlarge" => InstanceSpec::new(124928, 16),
        "r3.8xlarge" | "i3.8xlarge" => InstanceSpec::new(249856, 32),

        "d2.xlarge" => InstanceSpec::new(31232, 4),
        "d2.2xlarge" => InstanceSpec::new(62464, 8),
        "d2.4xlarge" => InstanceSpec::new(124928, 16),
        "d2.8xlarge" => InstanceSpec::new(249856, 36),

        _ => return None,
    };
    Some(spec)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_types_resolve() {
        assert_eq!(instance_spec("t2.micro"), Some(InstanceSpec::new(1024, 1)));
        assert_eq!(instance_spec("m3.medium").map(|s| s.memory_mib), Some(3840));
        assert_eq!(instance_spec("i3.large"), instance_spec("r3.large"));
    }

    #[test]
    fn unknown_type_is_none() {
        assert_eq!(instance_spec("z9.huge"), None);
        assert_eq!(instance_spec(""), None);
    }
}
