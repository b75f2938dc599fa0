// Copyright (c) Microsoft. All rights reserved.

/// Registration status reported by the provisioning service.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProvisioningStatus {
    Unassigned,
    Assigning,
    Assigned,
    Failed,
    Disabled,
}

impl ProvisioningStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ProvisioningStatus::Assigned | ProvisioningStatus::Failed | ProvisioningStatus::Disabled
        )
    }
}

impl std::str::FromStr for ProvisioningStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "unassigned" => Ok(ProvisioningStatus::Unassigned),
            "assigning" => Ok(ProvisioningStatus::Assigning),
            "assigned" => Ok(ProvisioningStatus::Assigned),
            "failed" => Ok(ProvisioningStatus::Failed),
            "disabled" => Ok(ProvisioningStatus::Disabled),
            _ => Err(format!("unknown provisioning status {:?}", s)),
        }
    }
}

impl std::fmt::Display for ProvisioningStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ProvisioningStatus::Unassigned => "unassigned",
            ProvisioningStatus::Assigning => "assigning",
            ProvisioningStatus::Assigned => "assigned",
            ProvisioningStatus::Failed => "failed",
            ProvisioningStatus::Disabled => "disabled",
        })
    }
}

/// Progress of a registration attempt, as seen by the device.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProvisioningDeviceClientStatus {
    Unauthenticated,
    Authenticated,
    Assigning,
    Assigned,
    Error,
}

/// Final outcome of a registration attempt.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RegistrationInfo {
    iothub_uri: Option<String>,
    device_id: Option<String>,
    status: ProvisioningDeviceClientStatus,
}

impl RegistrationInfo {
    pub fn new(
        iothub_uri: Option<String>,
        device_id: Option<String>,
        status: ProvisioningDeviceClientStatus,
    ) -> Self {
        RegistrationInfo {
            iothub_uri,
            device_id,
            status,
        }
    }

    pub fn iothub_uri(&self) -> Option<&str> {
        self.iothub_uri.as_deref()
    }

    pub fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }

    pub fn status(&self) -> ProvisioningDeviceClientStatus {
        self.status
    }
}

#[cfg(test)]
mod tests {
    use super::ProvisioningStatus;

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!(
            "Assigned".parse::<ProvisioningStatus>().unwrap(),
            ProvisioningStatus::Assigned
        );
        assert_eq!(
            "ASSIGNING".parse::<ProvisioningStatus>().unwrap(),
            ProvisioningStatus::Assigning
        );
        assert!("registered".parse::<ProvisioningStatus>().is_err());
        assert!("".parse::<ProvisioningStatus>().is_err());
    }

    #[test]
    fn terminal_states() {
        assert!(!ProvisioningStatus::Unassigned.is_terminal());
        assert!(!ProvisioningStatus::Assigning.is_terminal());
        assert!(ProvisioningStatus::Assigned.is_terminal());
        assert!(ProvisioningStatus::Failed.is_terminal());
        assert!(ProvisioningStatus::Disabled.is_terminal());
    }
}
