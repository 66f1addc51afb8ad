//! Service plan repository.
//!
//! Plans live in the root scope and are read and patched with the caller's
//! client. Organization-restricted visibility lists org GUIDs; records
//! resolve them to the orgs the caller can see.
use super::orgs::{ListOrgsMessage, OrgRepo};
use super::predicates::PredicateChain;
use super::{PLAN_RESOURCE, unexpected_spec};
use crate::client::{AuthInfo, ClientFactory};
use crate::errors::{RepoResult, StoreResultExt};
use crate::model::{
    Object, ObjectKey, PLAN_AVAILABLE_LABEL, PlanVisibilitySpec, ResourceKind,
    SERVICE_BROKER_GUID_LABEL, SERVICE_OFFERING_GUID_LABEL, ServicePlanSpec, Spec,
    VisibilityType,
};
use crate::store::{ListOptions, ObjectClient, ObjectPatch};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct ListPlansMessage {
    pub guids: Vec<String>,
    pub names: Vec<String>,
    pub service_offering_guids: Vec<String>,
    pub broker_guids: Vec<String>,
    pub available: Option<bool>,
}

/// Replace the plan's visibility.
#[derive(Debug, Clone)]
pub struct UpdatePlanVisibilityMessage {
    pub plan_guid: String,
    pub visibility_type: VisibilityType,
    pub organizations: Vec<String>,
}

/// Add organizations to the plan's visibility. Any type other than
/// `organization` clears the organization list.
#[derive(Debug, Clone)]
pub struct ApplyPlanVisibilityMessage {
    pub plan_guid: String,
    pub visibility_type: VisibilityType,
    pub organizations: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct DeletePlanVisibilityMessage {
    pub plan_guid: String,
    pub org_guid: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisibilityOrganization {
    pub guid: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanVisibilityRecord {
    pub visibility_type: VisibilityType,
    pub organizations: Vec<VisibilityOrganization>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanRecord {
    pub guid: String,
    pub name: String,
    pub description: String,
    pub free: bool,
    pub visibility: PlanVisibilityRecord,
    pub service_offering_guid: Option<String>,
    pub available: bool,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

fn plan_spec(object: &Object) -> RepoResult<&ServicePlanSpec> {
    match &object.spec {
        Spec::ServicePlan(spec) => Ok(spec),
        _ => Err(unexpected_spec(PLAN_RESOURCE, object)),
    }
}

/// Deduplicate, keeping first occurrences in order.
fn uniq(values: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    values
        .into_iter()
        .filter(|value| seen.insert(value.clone()))
        .collect()
}

fn update_visibility(visibility: &mut PlanVisibilitySpec, message: UpdatePlanVisibilityMessage) {
    visibility.visibility_type = message.visibility_type;
    visibility.organizations = uniq(message.organizations);
}

fn apply_visibility(visibility: &mut PlanVisibilitySpec, message: ApplyPlanVisibilityMessage) {
    visibility.visibility_type = message.visibility_type;
    if message.visibility_type != VisibilityType::Organization {
        visibility.organizations.clear();
        return;
    }
    let existing = std::mem::take(&mut visibility.organizations);
    visibility.organizations = uniq(existing.into_iter().chain(message.organizations));
}

fn delete_visibility(visibility: &mut PlanVisibilitySpec, org_guid: &str) {
    visibility.organizations.retain(|org| org != org_guid);
}

pub struct PlanRepo {
    clients: ClientFactory,
    orgs: Arc<OrgRepo>,
    root_namespace: String,
}

impl PlanRepo {
    pub fn new(clients: ClientFactory, orgs: Arc<OrgRepo>, root_namespace: impl Into<String>) -> Self {
        Self {
            clients,
            orgs,
            root_namespace: root_namespace.into(),
        }
    }

    pub async fn list_plans(
        &self,
        auth: &AuthInfo,
        message: ListPlansMessage,
    ) -> RepoResult<Vec<PlanRecord>> {
        let client = self.clients.build_client(auth).await?;
        let mut options = ListOptions::in_scope(&self.root_namespace)
            .with_label_in(SERVICE_OFFERING_GUID_LABEL, message.service_offering_guids)
            .with_label_in(SERVICE_BROKER_GUID_LABEL, message.broker_guids);
        if let Some(available) = message.available {
            options = options.with_label_in(PLAN_AVAILABLE_LABEL, [available.to_string()]);
        }
        let plans = client
            .list(ResourceKind::ServicePlan, &options)
            .await
            .for_resource(PLAN_RESOURCE, "failed to list service plans")?;

        let filters = PredicateChain::<Object>::new()
            .field_in(message.guids, |plan| Some(plan.name()))
            .field_in(message.names, |plan| match &plan.spec {
                Spec::ServicePlan(spec) => Some(spec.name.as_str()),
                _ => None,
            });
        let plans = filters.apply(plans);
        let org_names = self.visible_org_names(auth, &plans).await?;
        plans
            .iter()
            .map(|plan| plan_record(plan, &org_names))
            .collect()
    }

    pub async fn get_plan(&self, auth: &AuthInfo, guid: &str) -> RepoResult<PlanRecord> {
        let client = self.clients.build_client(auth).await?;
        let plan = client
            .get(&self.key(guid))
            .await
            .for_resource(PLAN_RESOURCE, "failed to get service plan")?;
        self.single_record(auth, &plan).await
    }

    pub async fn update_plan_visibility(
        &self,
        auth: &AuthInfo,
        message: UpdatePlanVisibilityMessage,
    ) -> RepoResult<PlanRecord> {
        let guid = message.plan_guid.clone();
        self.patch_visibility(auth, &guid, |visibility| {
            update_visibility(visibility, message)
        })
        .await
    }

    pub async fn apply_plan_visibility(
        &self,
        auth: &AuthInfo,
        message: ApplyPlanVisibilityMessage,
    ) -> RepoResult<PlanRecord> {
        let guid = message.plan_guid.clone();
        self.patch_visibility(auth, &guid, |visibility| {
            apply_visibility(visibility, message)
        })
        .await
    }

    pub async fn delete_plan_visibility(
        &self,
        auth: &AuthInfo,
        message: DeletePlanVisibilityMessage,
    ) -> RepoResult<()> {
        self.patch_visibility(auth, &message.plan_guid, |visibility| {
            delete_visibility(visibility, &message.org_guid)
        })
        .await?;
        Ok(())
    }

    pub async fn delete_plan(&self, auth: &AuthInfo, guid: &str) -> RepoResult<()> {
        let client = self.clients.build_client(auth).await?;
        client
            .delete(&self.key(guid))
            .await
            .for_resource(PLAN_RESOURCE, "failed to delete service plan")?;
        tracing::info!(guid, identity = %client.identity(), "deleted service plan");
        Ok(())
    }

    async fn patch_visibility<F>(&self, auth: &AuthInfo, guid: &str, change: F) -> RepoResult<PlanRecord>
    where
        F: FnOnce(&mut PlanVisibilitySpec),
    {
        let client = self.clients.build_client(auth).await?;
        let plan = client
            .get(&self.key(guid))
            .await
            .for_resource(PLAN_RESOURCE, "failed to get service plan")?;
        let mut spec = plan_spec(&plan)?.clone();
        change(&mut spec.visibility);
        let patched = Self::replace_spec(client.as_ref(), &plan, spec).await?;
        tracing::info!(
            guid,
            visibility = patched_visibility(&patched),
            identity = %client.identity(),
            "patched service plan visibility"
        );
        self.single_record(auth, &patched).await
    }

    async fn replace_spec(
        client: &dyn ObjectClient,
        plan: &Object,
        spec: ServicePlanSpec,
    ) -> RepoResult<Object> {
        client
            .patch(&plan.key(), ObjectPatch::spec(Spec::ServicePlan(spec)))
            .await
            .for_resource(PLAN_RESOURCE, "failed to patch service plan")
    }

    async fn single_record(&self, auth: &AuthInfo, plan: &Object) -> RepoResult<PlanRecord> {
        let org_names = self
            .visible_org_names(auth, std::slice::from_ref(plan))
            .await?;
        plan_record(plan, &org_names)
    }

    /// Names of the orgs the caller can see among those any of `plans` is
    /// visible to. Resolved with one org listing regardless of plan count.
    async fn visible_org_names(
        &self,
        auth: &AuthInfo,
        plans: &[Object],
    ) -> RepoResult<HashMap<String, String>> {
        let mut wanted = BTreeSet::new();
        for plan in plans {
            let visibility = &plan_spec(plan)?.visibility;
            if visibility.visibility_type == VisibilityType::Organization {
                wanted.extend(visibility.organizations.iter().cloned());
            }
        }
        if wanted.is_empty() {
            return Ok(HashMap::new());
        }
        let orgs = self
            .orgs
            .list_orgs(
                auth,
                ListOrgsMessage {
                    guids: wanted.into_iter().collect(),
                    ..ListOrgsMessage::default()
                },
            )
            .await?;
        Ok(orgs.into_iter().map(|org| (org.guid, org.name)).collect())
    }

    fn key(&self, guid: &str) -> ObjectKey {
        ObjectKey::new(ResourceKind::ServicePlan, &self.root_namespace, guid)
    }
}

fn plan_record(plan: &Object, org_names: &HashMap<String, String>) -> RepoResult<PlanRecord> {
    let spec = plan_spec(plan)?;
    Ok(PlanRecord {
        guid: plan.meta.name.clone(),
        name: spec.name.clone(),
        description: spec.description.clone(),
        free: spec.free,
        visibility: PlanVisibilityRecord {
            visibility_type: spec.visibility.visibility_type,
            organizations: visibility_organizations(&spec.visibility, org_names),
        },
        service_offering_guid: plan
            .meta
            .label(SERVICE_OFFERING_GUID_LABEL)
            .map(str::to_string),
        available: plan.meta.label(PLAN_AVAILABLE_LABEL) == Some("true"),
        labels: plan.meta.labels.clone(),
        annotations: plan.meta.annotations.clone(),
        created_at: plan.meta.created_at.unwrap_or_default(),
        updated_at: plan.meta.updated_at,
    })
}

/// Orgs named by an organization-type visibility, in stored order, limited to
/// those present in `org_names`.
fn visibility_organizations(
    visibility: &PlanVisibilitySpec,
    org_names: &HashMap<String, String>,
) -> Vec<VisibilityOrganization> {
    if visibility.visibility_type != VisibilityType::Organization {
        return Vec::new();
    }
    visibility
        .organizations
        .iter()
        .filter_map(|guid| {
            org_names.get(guid).map(|name| VisibilityOrganization {
                guid: guid.clone(),
                name: name.clone(),
            })
        })
        .collect()
}

fn patched_visibility(plan: &Object) -> &'static str {
    match &plan.spec {
        Spec::ServicePlan(spec) => spec.visibility.visibility_type.as_str(),
        _ => "unknown",
    }
}
