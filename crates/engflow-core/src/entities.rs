//! The fixed set of migrated entities and the reference graph between them.
//!
//! Each entity name doubles as its local-store key and its remote table name.
//! The reference graph is a DAG; [`Entity::ALL`] lists it parents-first and
//! [`Entity::DELETION_ORDER`] lists it children-first.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Entity {
    Clientes,
    Setores,
    Funcoes,
    Funcionarios,
    Obras,
    Despesas,
    Videos,
    Requisicoes,
}

/// A single foreign-key column: `child.column` points at `parent.id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForeignKey {
    pub child: Entity,
    pub column: &'static str,
    pub parent: Entity,
}

/// A named relationship checked as one unit by the integrity validator.
/// Multi-parent relationships (e.g. `despesas → obras/clientes`) group
/// several foreign-key columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relationship {
    pub child: Entity,
    pub keys: &'static [ForeignKey],
}

const FUNCOES_KEYS: &[ForeignKey] = &[ForeignKey {
    child: Entity::Funcoes,
    column: "setor_id",
    parent: Entity::Setores,
}];

const FUNCIONARIOS_KEYS: &[ForeignKey] = &[ForeignKey {
    child: Entity::Funcionarios,
    column: "funcao_id",
    parent: Entity::Funcoes,
}];

const OBRAS_KEYS: &[ForeignKey] = &[ForeignKey {
    child: Entity::Obras,
    column: "cliente_id",
    parent: Entity::Clientes,
}];

const DESPESAS_KEYS: &[ForeignKey] = &[
    ForeignKey {
        child: Entity::Despesas,
        column: "obra_id",
        parent: Entity::Obras,
    },
    ForeignKey {
        child: Entity::Despesas,
        column: "cliente_id",
        parent: Entity::Clientes,
    },
];

const VIDEOS_KEYS: &[ForeignKey] = &[ForeignKey {
    child: Entity::Videos,
    column: "obra_id",
    parent: Entity::Obras,
}];

const REQUISICOES_KEYS: &[ForeignKey] = &[
    ForeignKey {
        child: Entity::Requisicoes,
        column: "obra_id",
        parent: Entity::Obras,
    },
    ForeignKey {
        child: Entity::Requisicoes,
        column: "funcionario_id",
        parent: Entity::Funcionarios,
    },
];

/// The six relationships verified by the foreign-key phase, in check order.
pub const RELATIONSHIPS: &[Relationship] = &[
    Relationship {
        child: Entity::Funcoes,
        keys: FUNCOES_KEYS,
    },
    Relationship {
        child: Entity::Funcionarios,
        keys: FUNCIONARIOS_KEYS,
    },
    Relationship {
        child: Entity::Obras,
        keys: OBRAS_KEYS,
    },
    Relationship {
        child: Entity::Despesas,
        keys: DESPESAS_KEYS,
    },
    Relationship {
        child: Entity::Videos,
        keys: VIDEOS_KEYS,
    },
    Relationship {
        child: Entity::Requisicoes,
        keys: REQUISICOES_KEYS,
    },
];

impl Entity {
    /// Parents before children; the order records are inserted remotely.
    pub const ALL: [Entity; 8] = [
        Entity::Clientes,
        Entity::Setores,
        Entity::Funcoes,
        Entity::Funcionarios,
        Entity::Obras,
        Entity::Despesas,
        Entity::Videos,
        Entity::Requisicoes,
    ];

    /// Children before parents; the only safe order for remote deletes.
    pub const DELETION_ORDER: [Entity; 8] = [
        Entity::Requisicoes,
        Entity::Videos,
        Entity::Despesas,
        Entity::Obras,
        Entity::Funcionarios,
        Entity::Funcoes,
        Entity::Setores,
        Entity::Clientes,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Entity::Clientes => "clientes",
            Entity::Setores => "setores",
            Entity::Funcoes => "funcoes",
            Entity::Funcionarios => "funcionarios",
            Entity::Obras => "obras",
            Entity::Despesas => "despesas",
            Entity::Videos => "videos",
            Entity::Requisicoes => "requisicoes",
        }
    }

    /// Canonical key of this entity in the local key-value store.
    pub fn storage_key(&self) -> &'static str {
        self.as_str()
    }

    /// Remote table holding this entity.
    pub fn table_name(&self) -> &'static str {
        self.as_str()
    }

    /// Foreign-key columns declared on this entity.
    pub fn foreign_keys(&self) -> &'static [ForeignKey] {
        match self {
            Entity::Clientes | Entity::Setores => &[],
            Entity::Funcoes => FUNCOES_KEYS,
            Entity::Funcionarios => FUNCIONARIOS_KEYS,
            Entity::Obras => OBRAS_KEYS,
            Entity::Despesas => DESPESAS_KEYS,
            Entity::Videos => VIDEOS_KEYS,
            Entity::Requisicoes => REQUISICOES_KEYS,
        }
    }

    /// Foreign-key columns on other entities that point at this one.
    pub fn referenced_by(&self) -> impl Iterator<Item = &'static ForeignKey> + '_ {
        Entity::ALL
            .iter()
            .flat_map(|entity| entity.foreign_keys().iter())
            .filter(move |key| key.parent == *self)
    }
}

impl Relationship {
    /// Human-readable label, e.g. `despesas → obras/clientes`.
    pub fn label(&self) -> String {
        let parents: Vec<&str> = self.keys.iter().map(|key| key.parent.as_str()).collect();
        format!("{} → {}", self.child, parents.join("/"))
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
