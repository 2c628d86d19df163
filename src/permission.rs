// Copyright 2022-2023 Debox Network
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.
//

use serde::{Deserialize, Serialize};

use crate::api::File;
use crate::error::{GatewayError, GatewayResult};

/// Role of the caller on a file, ordered from weakest to strongest.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum PermissionLevel {
    #[default]
    None,
    Viewer,
    Editor,
    Owner,
}

/// Roles this gateway does not know grant nothing.
impl From<String> for PermissionLevel {
    fn from(value: String) -> Self {
        match value.as_str() {
            "viewer" => PermissionLevel::Viewer,
            "editor" => PermissionLevel::Editor,
            "owner" => PermissionLevel::Owner,
            _ => PermissionLevel::None,
        }
    }
}

/// Fails with a permission error unless the caller holds at least `required` on `file`.
pub fn require(file: &File, required: PermissionLevel) -> GatewayResult<()> {
    if file.permission >= required {
        Ok(())
    } else {
        Err(GatewayError::Permission {
            file_id: file.id.clone(),
            required,
            actual: file.permission,
        })
    }
}
