//! Prints the controller's CustomResourceDefinitions as a multi-document YAML stream.

use kube::CustomResourceExt;
use resource_claim_controller::crd::{
    AksCluster, KubernetesCluster, MySQLInstance, MysqlServer, PostgreSQLInstance, PostgresqlServer,
    Provider, ResourceClass,
};

fn main() -> anyhow::Result<()> {
    let crds = [
        ResourceClass::crd(),
        Provider::crd(),
        PostgreSQLInstance::crd(),
        MySQLInstance::crd(),
        KubernetesCluster::crd(),
        PostgresqlServer::crd(),
        MysqlServer::crd(),
        AksCluster::crd(),
    ];
    for crd in &crds {
        println!("---");
        print!("{}", serde_yaml::to_string(crd)?);
    }
    Ok(())
}
