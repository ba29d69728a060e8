// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use std::fmt;

/// KubeObjectRef identifies a namespaced object; it is the key of a reconcile request.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KubeObjectRef {
    pub namespace: String,
    pub name: String,
}

impl KubeObjectRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> KubeObjectRef {
        KubeObjectRef {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for KubeObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}
