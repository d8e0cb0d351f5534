use kube::CustomResourceExt;

use stateless_pg_operator::api::{
    NeonCluster, PageServer, PageServerProfile, SafeKeeper, SafeKeeperProfile, StorageBroker,
    StorageBrokerProfile,
};

fn main() {
    let crds = [
        serde_yaml::to_string(&NeonCluster::crd()).unwrap(),
        serde_yaml::to_string(&PageServer::crd()).unwrap(),
        serde_yaml::to_string(&SafeKeeper::crd()).unwrap(),
        serde_yaml::to_string(&StorageBroker::crd()).unwrap(),
        serde_yaml::to_string(&PageServerProfile::crd()).unwrap(),
        serde_yaml::to_string(&SafeKeeperProfile::crd()).unwrap(),
        serde_yaml::to_string(&StorageBrokerProfile::crd()).unwrap(),
    ];
    print!("{}", crds.join("---\n"))
}
